pub mod catalog {
    pub mod client;
    pub mod error;
    pub mod models;
}

pub mod config;
pub mod connectivity;
pub mod logger;
