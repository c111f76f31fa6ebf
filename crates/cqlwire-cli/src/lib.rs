// Copyright 2025 cqlwire Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # cqlwire CLI
//!
//! Command-line interface for talking to a CQL cluster through
//! `cqlwire-client`.
//!
//! - **Queries**: run ad-hoc CQL and print each row as a JSON line
//! - **System tables**: list roles and connected clients as typed records
//! - **Ping**: connect and report the health of every configured node
//!
//! ## Architecture
//!
//! The binary parses its arguments with `argh`, layers them over an optional
//! JSON configuration file, and drives a [`cqlwire_client::Session`]. This
//! library holds the parts that do not depend on argument parsing: the
//! system table records and the JSON rendering of rows.

pub mod output;
pub mod records;
