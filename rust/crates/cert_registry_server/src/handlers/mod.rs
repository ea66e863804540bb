pub mod entities;
pub mod files;
pub mod health;
pub mod params;
