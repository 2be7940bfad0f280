use super::error::{ContainerError, corruption};
use crate::Result;
use crate::data::CellTypeId;
use ohno::AppError;
use rustc_hash::FxHashMap;

/// Tag written for a missing cell.
pub const MISSING_TAG: u8 = 0;

/// Tag written for a value persisted through its type's fallback codec.
pub const FALLBACK_TAG: u8 = 1;

/// First tag handed out to a concrete value type.
pub const FIRST_TYPE_TAG: u8 = 2;

/// Last tag that can be handed out.
pub const LAST_TYPE_TAG: u8 = 127;

/// Number of distinct value types one container can address.
pub const TAG_BUDGET: usize = (LAST_TYPE_TAG - FIRST_TYPE_TAG) as usize + 1;

/// Write-side dictionary, grown in first-seen order while rows are encoded.
#[derive(Debug, Clone, Default)]
pub struct TagDictionary {
    tags: FxHashMap<CellTypeId, u8>,
    order: Vec<CellTypeId>,
}

impl TagDictionary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the tag of `id`, allocating the next free one on first use.
    pub fn tag_for(&mut self, id: &CellTypeId) -> Result<u8> {
        if let Some(tag) = self.tags.get(id) {
            return Ok(*tag);
        }

        if self.order.len() >= TAG_BUDGET {
            return Err(AppError::new(ContainerError::TagBudgetExhausted { limit: TAG_BUDGET }));
        }

        #[expect(clippy::cast_possible_truncation, reason = "bounded by TAG_BUDGET above")]
        let tag = FIRST_TYPE_TAG + self.order.len() as u8;
        let _ = self.tags.insert(id.clone(), tag);
        self.order.push(id.clone());
        Ok(tag)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Produces the read-side lookup array.
    #[must_use]
    pub fn freeze(&self) -> FrozenDictionary {
        FrozenDictionary {
            types: self.order.clone(),
        }
    }
}

/// Read-side dictionary: the type at index `tag - FIRST_TYPE_TAG`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrozenDictionary {
    types: Vec<CellTypeId>,
}

impl FrozenDictionary {
    /// Rebuilds a dictionary from persisted type ids in tag order.
    pub fn from_types(types: Vec<CellTypeId>) -> Result<Self> {
        if types.len() > TAG_BUDGET {
            return Err(corruption(format!(
                "type dictionary holds {} entries, at most {TAG_BUDGET} are addressable",
                types.len()
            )));
        }

        Ok(Self { types })
    }

    pub fn type_for(&self, tag: u8) -> Result<&CellTypeId> {
        tag.checked_sub(FIRST_TYPE_TAG)
            .and_then(|index| self.types.get(usize::from(index)))
            .ok_or_else(|| corruption(format!("type tag {tag} is outside the dictionary of {} types", self.types.len())))
    }

    #[must_use]
    pub fn types(&self) -> &[CellTypeId] {
        &self.types
    }
}
