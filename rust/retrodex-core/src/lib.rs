// SPDX-License-Identifier: Apache-2.0
// SPDX-FileCopyrightText: Copyright The Lance Authors

pub mod error;
pub mod utils;

pub use error::{box_error, Error, Result};
