// Copyright 2026 The Scopeline Authors. Licensed under Apache-2.0.

//! Small internal helpers shared across modules — not part of the public API.

pub mod pool;
pub mod time;
