pub mod gateway_client;
pub mod status_mapper;
pub mod webhook_signature;
