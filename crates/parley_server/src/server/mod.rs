#![forbid(unsafe_code)]

pub mod connection;
pub mod dispatcher;
pub mod handlers;
pub mod health;
pub mod lifecycle;
pub mod registry;
pub mod session;

#[cfg(test)]
mod test_support;


#[cfg(test)]
mod handlers_tests;
