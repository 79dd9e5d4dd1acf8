#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(unused_variables)]

pub mod data;
pub mod diagnostics;
pub mod estimate;
pub mod inference;
pub mod irls;
pub mod matrix;
pub mod model;
pub mod report;
pub mod simulate;
pub mod summary;
pub mod types;
