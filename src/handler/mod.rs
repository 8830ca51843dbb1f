pub mod auction;
pub mod conversation;
pub mod countdown;
pub mod notification;
pub mod realtime;
