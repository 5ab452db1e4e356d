// MIT License - Copyright (c) 2026 Peter Wright
// Boiler presentation

pub mod boiler;
pub mod sensor;
