// Copyright 2025 Johann Kempter
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
//
// SPDX-License-Identifier: Apache-2.0

//! Metadata as seen by the decompiler.
//!
//! This module holds the vocabulary shared with the metadata collaborator:
//!
//! - [`token`] - raw operand tokens
//! - [`types`] - the [`types::TypeSig`] type model and generic contexts
//! - [`descriptor`] - resolved methods, fields and method bodies
//! - [`resolver`] - the [`resolver::Resolver`] trait implemented by the host

pub mod descriptor;
pub mod resolver;
pub mod token;
pub mod types;
