pub mod attribution;
pub mod blame;
pub mod cli;
pub mod db;
pub mod error;
pub mod exclusion;
pub mod gateway;
pub mod model;
pub mod report;
pub mod review;
pub mod tree;
