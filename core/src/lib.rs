/*
 * lib.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Tether, a keep-alive HTTP/1.1 client library.
 *
 * Tether is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Tether is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Tether.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Tether core: a keep-alive HTTP/1.1 client.
//!
//! ```no_run
//! # async fn demo() -> tether_core::protocol::http::Result<()> {
//! use tether_core::protocol::http::Client;
//!
//! let mut client = Client::with_base_address("https://api.example.com/v1/")?;
//! client.set_header("Authorization", "Bearer token")?;
//! let text = client.get("status", None).await?.text().await?;
//! println!("{}", text);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod net;
pub mod protocol;
pub mod uri;

pub use config::ClientOptions;
pub use net::CertificateValidator;
pub use protocol::http::{Client, HttpError, Response};
