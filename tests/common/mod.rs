pub(crate) mod data_container;

pub(crate) mod fixtures;

pub(crate) mod logging;

pub(crate) mod network;

pub(crate) mod node;
