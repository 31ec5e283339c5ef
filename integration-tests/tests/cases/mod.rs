// SPDX-License-Identifier: GPL-3.0-or-later

//! End-to-end test cases that drive the real `bear` binary.

pub mod compilation_output;
