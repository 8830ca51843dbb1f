pub mod auctiondb;
pub mod conversationdb;
pub mod countdowndb;
pub mod db;
pub mod userdb;
