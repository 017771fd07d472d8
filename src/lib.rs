// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Idempotent provisioning action runner.
//!
//! Provkit runs named __actions__ from a staged catalog. Every action goes
//! through the same lifecycle: it logs to its own file, records its outcome
//! in a small `key=value` state file, and skips itself when a prior run
//! already succeeded. Re-running any action is therefore safe and cheap.
//!
//! # Runtime Layout
//!
//! ```text
//! <target_root>/
//! ├── actions/   # staged catalog, one executable per action
//! ├── bin/       # dispatcher and wrapper entrypoints
//! ├── VERSION    # catalog version tag
//! ├── logs/      # <action>.log plus .dispatcher.log
//! └── state/     # <action>.state
//! ```
//!
//! Logs and state live under the target root unless configured elsewhere.
//! See [`config`] for the configuration file, and [`stage`] for how the
//! catalog gets there in the first place.

pub mod action;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod log;
pub mod path;
pub mod stage;
pub mod state;

#[doc(inline)]
pub use action::{Action, ActionName, Context, Identity, Provision, Tracked};

#[doc(inline)]
pub use config::{Layout, Settings};

#[doc(inline)]
pub use dispatch::Dispatcher;

#[doc(inline)]
pub use stage::Stager;
