//! Host + path routing for the L7 side.

pub mod table;

pub use table::RouteTable;
