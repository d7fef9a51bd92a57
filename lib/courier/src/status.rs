// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::fmt;

/// Return codes of the message-passing surface.
///
/// Channel-derived codes map one-to-one onto the channel operation results;
/// the rest describe framework-level conditions. The `Display` strings are
/// part of the interface (they appear in logs and are matched by tooling),
/// so they mirror the variant names exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    Undefined,
    Success,
    /// Delivery is delayed by back-pressure; a terminal report follows.
    Pending,
    InvalidChannelSize,
    ThreadCreationError,
    UnhandledException,
    /// The relay hit a non-recoverable downstream error.
    RelayError,
    ChannelEmpty,
    ChannelFull,
    ChannelClosed,
    ChannelTimeout,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Undefined => "Undefined",
            Status::Success => "Success",
            Status::Pending => "Pending",
            Status::InvalidChannelSize => "InvalidChannelSize",
            Status::ThreadCreationError => "ThreadCreationError",
            Status::UnhandledException => "UnhandledException",
            Status::RelayError => "RelayError",
            Status::ChannelEmpty => "ChannelEmpty",
            Status::ChannelFull => "ChannelFull",
            Status::ChannelClosed => "ChannelClosed",
            Status::ChannelTimeout => "ChannelTimeout",
        }
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
