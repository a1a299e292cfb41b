//! chartdex library exports

pub mod repo;
