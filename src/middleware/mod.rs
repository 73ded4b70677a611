// HTTP middleware: CORS

pub mod cors;

pub use cors::*;
