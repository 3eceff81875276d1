pub mod grades;
pub mod mail;
pub mod portal;
