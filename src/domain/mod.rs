// Domain layer: support mail models, analytics records and ports (interfaces).

pub mod analytics;
pub mod model;
pub mod ports;
