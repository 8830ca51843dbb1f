pub mod auctionmodel;
pub mod conversationmodel;
pub mod countdownmodel;
pub mod notificationmodel;
pub mod usermodel;
