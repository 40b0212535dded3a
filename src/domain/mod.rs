// Domain layer: tokens, nodes and ports. Only std/serde types here.

pub mod model;
pub mod ports;
