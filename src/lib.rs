// SPDX-License-Identifier: Apache-2.0

pub mod crypto;
pub mod init;
pub mod journal;
pub mod uploader;
