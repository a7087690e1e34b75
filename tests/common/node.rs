use std::sync::Arc;

use triangle_rs::{
    backup::state_transfer::LoggingStateTransfer,
    commands::{ExecutedWrite, WriteCommand},
    node::{Configuration, Node, NodeSpec},
    primary::replicator::ReplicationError,
    types::basic::{CacheName, CommandInvocationId, Flags, SegmentId, SequenceNumber},
};

use crate::common::{data_container::DataContainer, network::NetworkStub};

pub(crate) type TestNode = Node<NetworkStub, Arc<DataContainer>, LoggingStateTransfer>;

/// Start a node on `network` with a fresh [`DataContainer`] and no event handlers.
pub(crate) fn start_node(network: NetworkStub) -> (TestNode, Arc<DataContainer>) {
    let container = DataContainer::new();
    let configuration = Configuration::builder()
        .me(network.me())
        .reorder_buffer_capacity(64)
        .apply_threads(2)
        .log_events(false)
        .build();

    let node = NodeSpec::builder()
        .network(network)
        .pipeline(container.clone())
        .state_transfer(LoggingStateTransfer)
        .configuration(configuration)
        .build()
        .start();

    (node, container)
}

/// Execute `command` on the primary's own container, then replicate it to the backups the way a primary
/// does after a successful local write.
pub(crate) fn execute_and_replicate(
    node: &TestNode,
    container: &DataContainer,
    cache: &CacheName,
    invocation: u64,
    command: WriteCommand,
) -> Result<Vec<(SegmentId, SequenceNumber)>, ReplicationError> {
    let topology = node.topology(cache).unwrap().current();
    let successful = container.execute(&command);

    let executed = ExecutedWrite {
        cache: cache.clone(),
        invocation_id: CommandInvocationId::new(node.me(), invocation),
        topology_id: topology.topology_id(),
        flags: Flags::NONE,
        command,
        successful,
    };
    node.replicator(cache).unwrap().on_local_write_executed(&executed)
}
