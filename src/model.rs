//! Block model: positions, block states and positioned blocks.
//!
//! # Equality
//! A [`BlockState`] is a type name plus a property map.  Properties live in
//! a `BTreeMap`, so equality and hashing ignore insertion order and the
//! textual form (`name[k=v,...]`) is canonical.
//!
//! # Sharing
//! Decoders hand out `Arc<BlockState>` so a palette entry is allocated once
//! and referenced by every block that uses it.  [`StateInterner`] offers
//! the same deduplication to callers building blocks by hand.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::Serialize;

use crate::error::{Result, VoxelError};

pub const AIR:      &str = "minecraft:air";
pub const CAVE_AIR: &str = "minecraft:cave_air";
pub const VOID_AIR: &str = "minecraft:void_air";

// ── Position ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Position {
    #[inline]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

impl From<(i32, i32, i32)> for Position {
    fn from((x, y, z): (i32, i32, i32)) -> Self {
        Self { x, y, z }
    }
}

// ── BlockState ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BlockState {
    name:       String,
    properties: BTreeMap<String, String>,
}

impl BlockState {
    pub fn new(name: impl Into<String>, properties: BTreeMap<String, String>) -> Self {
        Self { name: name.into(), properties }
    }

    pub fn from_name(name: impl Into<String>) -> Self {
        Self { name: name.into(), properties: BTreeMap::new() }
    }

    /// Shared handle to the canonical air state.
    pub fn air() -> Arc<BlockState> {
        static AIR_STATE: OnceLock<Arc<BlockState>> = OnceLock::new();
        AIR_STATE.get_or_init(|| Arc::new(BlockState::from_name(AIR))).clone()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Air and its cave/void variants are all "empty" for streaming purposes.
    pub fn is_air(&self) -> bool {
        matches!(self.name.as_str(), AIR | CAVE_AIR | VOID_AIR)
    }

    /// Parse `namespace:name[key=value,...]`.  A missing namespace is left
    /// as written; no `minecraft:` prefix is inferred.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (name, rest) = match text.find('[') {
            Some(i) => (&text[..i], Some(&text[i + 1..])),
            None    => (text, None),
        };
        if name.is_empty() {
            return Err(VoxelError::invalid(format!("empty block name in '{text}'")));
        }
        let mut properties = BTreeMap::new();
        if let Some(rest) = rest {
            let body = rest.strip_suffix(']').ok_or_else(|| {
                VoxelError::invalid(format!("unterminated property list in '{text}'"))
            })?;
            for pair in body.split(',').filter(|p| !p.trim().is_empty()) {
                let (k, v) = pair.split_once('=').ok_or_else(|| {
                    VoxelError::invalid(format!("malformed property '{pair}' in '{text}'"))
                })?;
                properties.insert(k.trim().to_string(), v.trim().to_string());
            }
        }
        Ok(Self { name: name.to_string(), properties })
    }
}

impl fmt::Display for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if self.properties.is_empty() {
            return Ok(());
        }
        f.write_str("[")?;
        for (i, (k, v)) in self.properties.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
        }
        f.write_str("]")
    }
}

impl std::str::FromStr for BlockState {
    type Err = VoxelError;
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// ── Block ────────────────────────────────────────────────────────────────────

/// One positioned block.  Cloning is cheap: the state is reference-counted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Block {
    pub position: Position,
    pub state:    Arc<BlockState>,
}

impl Block {
    pub fn new(position: Position, state: Arc<BlockState>) -> Self {
        Self { position, state }
    }
}

/// Air at the origin; the fill value for freshly allocated read buffers.
impl Default for Block {
    fn default() -> Self {
        Self { position: Position::default(), state: BlockState::air() }
    }
}

// ── StateInterner ────────────────────────────────────────────────────────────

/// Explicit cache keyed by (type, properties).  Purely a memory optimisation:
/// an interned state compares equal to a freshly built one.
#[derive(Debug, Default)]
pub struct StateInterner {
    states: HashSet<Arc<BlockState>>,
}

impl StateInterner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, state: BlockState) -> Arc<BlockState> {
        if let Some(existing) = self.states.get(&state) {
            return existing.clone();
        }
        let shared = Arc::new(state);
        self.states.insert(shared.clone());
        shared
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}
