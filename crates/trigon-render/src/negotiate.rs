// SPDX-License-Identifier: CEPL-1.0
//! Wish-list negotiation against what a surface reports.
//!
//! Both helpers are pure: the caller queries the surface, these pick values.

use std::fmt::Debug;

use thiserror::Error;

use crate::RenderSize;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NegotiationError {
    /// Neither a requested value nor the fixed default is supported.
    #[error("no requested {what} is supported, and neither is the default {default}")]
    Unsupported { what: &'static str, default: String },

    #[error(
        "surface extent bounds are inverted: min {}x{} > max {}x{}",
        .min.width, .min.height, .max.width, .max.height
    )]
    InvertedBounds { min: RenderSize, max: RenderSize },
}

/// Returns the first entry of `requested` (highest priority first) that appears in
/// `supported`, else `default` when supported.
pub fn pick_preferred<T>(
    what: &'static str,
    requested: &[T],
    supported: &[T],
    default: T,
) -> Result<T, NegotiationError>
where
    T: Copy + PartialEq + Debug,
{
    if let Some(&hit) = requested.iter().find(|r| supported.contains(r)) {
        return Ok(hit);
    }
    if supported.contains(&default) {
        return Ok(default);
    }
    Err(NegotiationError::Unsupported {
        what,
        default: format!("{default:?}"),
    })
}

/// Clamps `requested` per axis into `[min, max]`.
pub fn clamp_extent(
    min: RenderSize,
    max: RenderSize,
    requested: RenderSize,
) -> Result<RenderSize, NegotiationError> {
    if min.width > max.width || min.height > max.height {
        return Err(NegotiationError::InvertedBounds { min, max });
    }
    Ok(RenderSize {
        width: requested.width.clamp(min.width, max.width),
        height: requested.height.clamp(min.height, max.height),
    })
}
