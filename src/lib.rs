#![recursion_limit = "1024"]

#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_json;
extern crate serde;

pub mod chain;
pub mod daemon;
pub mod def;
pub mod errors;
pub mod metrics;
pub mod signal;
pub mod timeout;
pub mod txauthor;
pub mod txrules;
pub mod txsizes;
pub mod util;
