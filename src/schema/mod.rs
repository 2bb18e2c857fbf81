pub mod quality;
pub mod registry;
pub mod storylet;
