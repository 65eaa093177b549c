// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Attribute names shared by metrics and log events.

pub(crate) const CACHE_NAME: &str = "cache.name";
pub(crate) const CACHE_OPERATION_NAME: &str = "cache.operation";
pub(crate) const CACHE_ACTIVITY_NAME: &str = "cache.activity";
