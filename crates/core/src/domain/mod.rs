pub mod request;
pub mod series;
pub mod table;
