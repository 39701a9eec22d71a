pub mod fetch;
pub mod macro_series;
pub mod table;
