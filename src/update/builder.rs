//! # Insertion-Sequence Builder
//!
//! Turns a payload (a list of fragments, in request order) into a staged
//! [`DataClip`]. The builder enforces the text invariant of the data model on
//! the way:
//!
//! - adjacent text items are concatenated into one text node, at the top
//!   level and inside every copied element or document
//! - empty text items are dropped
//! - in [`BuildMode::Nodes`], document fragments are replaced by their
//!   children, so inserting a document inserts its content
//!
//! ```text
//! payload:  [ "ab", "cd", <x/>, "", "ef" ]
//! clip:     [ "abcd", <x/>, "ef" ]            fragments() == 3
//! ```
//!
//! Every copied node counts towards the cancellation poll; the flag is
//! checked once every `CANCEL_POLL_INTERVAL` nodes.

use std::borrow::Cow;

use eyre::Result;

use super::CancelFlag;
use crate::config::CANCEL_POLL_INTERVAL;
use crate::error::UpdateError;
use crate::store::{DataClip, Fragment};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Node-level payload: documents are flattened into their children.
    Nodes,
    /// Resource payload: documents are kept as document roots.
    Documents,
}

/// Builds a staged clip from a payload.
pub fn build_clip(fragments: &[Fragment], mode: BuildMode, cancel: &CancelFlag) -> Result<DataClip> {
    let mut flattened: Vec<&Fragment> = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        match fragment {
            Fragment::Document { children, .. } if mode == BuildMode::Nodes => {
                flattened.extend(children.iter())
            }
            _ => flattened.push(fragment),
        }
    }

    let mut copied = 0usize;
    let mut poll = || -> Result<()> {
        copied += 1;
        if copied % CANCEL_POLL_INTERVAL == 0 && cancel.is_cancelled() {
            return Err(UpdateError::Cancelled.into());
        }
        Ok(())
    };

    let mut clip = DataClip::new();
    for fragment in coalesce(flattened.into_iter()) {
        clip.push_fragment(&normalize(&fragment), &mut poll)?;
    }
    Ok(clip)
}

/// Merges adjacent texts and drops empty ones.
fn coalesce<'a>(items: impl Iterator<Item = &'a Fragment>) -> Vec<Cow<'a, Fragment>> {
    let mut out: Vec<Cow<'a, Fragment>> = Vec::new();
    for item in items {
        if let Fragment::Text(value) = item {
            if value.is_empty() {
                continue;
            }
            if let Some(last) = out.last_mut() {
                if let Fragment::Text(previous) = &**last {
                    let joined = format!("{}{}", previous, value);
                    *last = Cow::Owned(Fragment::Text(joined));
                    continue;
                }
            }
        }
        out.push(Cow::Borrowed(item));
    }
    out
}

fn needs_normalizing(children: &[Fragment]) -> bool {
    children.iter().enumerate().any(|(i, child)| match child {
        Fragment::Text(value) => {
            value.is_empty() || matches!(children.get(i + 1), Some(Fragment::Text(_)))
        }
        Fragment::Element { children, .. } | Fragment::Document { children, .. } => {
            needs_normalizing(children)
        }
        _ => false,
    })
}

fn normalize_children(children: &[Fragment]) -> Vec<Fragment> {
    coalesce(children.iter())
        .into_iter()
        .map(|child| normalize(&child).into_owned())
        .collect()
}

fn normalize<'a>(fragment: &'a Fragment) -> Cow<'a, Fragment> {
    match fragment {
        Fragment::Element {
            name,
            attributes,
            children,
        } if needs_normalizing(children) => Cow::Owned(Fragment::Element {
            name: name.clone(),
            attributes: attributes.clone(),
            children: normalize_children(children),
        }),
        Fragment::Document { path, children } if needs_normalizing(children) => {
            Cow::Owned(Fragment::Document {
                path: path.clone(),
                children: normalize_children(children),
            })
        }
        _ => Cow::Borrowed(fragment),
    }
}
