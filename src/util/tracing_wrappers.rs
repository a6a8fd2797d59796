// Copyright (c) the rawdec Project Authors. All rights reserved.
//
// Use of this source code is governed by a BSD-style
// license that can be found in the LICENSE file.

#[cfg(feature = "tracing")]
#[allow(unused_imports)]
pub use tracing::{debug, trace, warn};

#[cfg(not(feature = "tracing"))]
#[allow(unused_macros)]
mod noop {
    macro_rules! trace {
        ($($args:tt)*) => {};
    }
    macro_rules! debug {
        ($($args:tt)*) => {};
    }
    macro_rules! warn_ {
        ($($args:tt)*) => {};
    }
    #[allow(unused_imports)]
    pub(crate) use {debug, trace, warn_ as warn};
}

#[cfg(not(feature = "tracing"))]
#[allow(unused_imports)]
pub(crate) use noop::*;
