mod auth;
mod errors;
mod handlers;
mod server;

pub use server::ApiServer;
