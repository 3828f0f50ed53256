pub mod auth;
pub mod convert_cookies;
pub mod doctor;
pub mod draft;
pub mod post;
