pub mod breaker;
pub mod errors;
pub mod init;
pub mod quota;
pub mod retry;
pub mod system_lock;
pub mod webhooks;
pub mod whatsapp;
pub mod worker;
