// SPDX-License-Identifier: MIT
// Inbox subsystem.
//
// Exposes:
//   - model     — InboxRecord, Message
//   - store     — InboxStore trait + SqliteStore adapter
//   - lifecycle — InboxService (generate address, drain inbox, sweep)

pub mod lifecycle;
pub mod model;
pub mod store;
