pub mod auction_service;
pub mod background_jobs;
pub mod conversation_service;
pub mod countdown_service;
pub mod error;
pub mod notification_service;
pub mod realtime_hub;
