//! Persisted per-user view state.
//!
//! # Responsibility
//! - Store small key/value view preferences that outlive a session.
//! - Expose typed accessors for the selected page, the detail view mode,
//!   and the expanded organizers.
//!
//! # Invariants
//! - Stored values `"null"`, `"undefined"`, and blank strings are
//!   serialization artifacts: they read as absent and are removed on read.
//! - Unknown detail modes read as the default mode.

use crate::model::record::RecordId;
use std::error::Error;
use std::fmt::{Display, Formatter};

mod sqlite_state;

pub use sqlite_state::SqliteLocalStateRepository;

pub const KEY_SELECTED_PAGE: &str = "selected_page_id";
pub const KEY_DETAIL_MODE: &str = "detail_mode";
pub const KEY_EXPANDED_ORGANIZERS: &str = "expanded_organizers";

const ARTIFACT_VALUES: [&str; 2] = ["null", "undefined"];

pub type LocalStateResult<T> = Result<T, LocalStateError>;

/// Errors from local state persistence.
#[derive(Debug)]
pub enum LocalStateError {
    Db(crate::db::DbError),
}

impl Display for LocalStateError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for LocalStateError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
        }
    }
}

impl From<crate::db::DbError> for LocalStateError {
    fn from(value: crate::db::DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for LocalStateError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(crate::db::DbError::Sqlite(value))
    }
}

/// Raw key/value persistence.
pub trait LocalStateRepository {
    fn get(&self, key: &str) -> LocalStateResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> LocalStateResult<()>;
    /// Returns whether a value was removed.
    fn remove(&self, key: &str) -> LocalStateResult<bool>;
}

/// What the detail pane shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DetailMode {
    /// The selected page.
    Page,
    /// Records awaiting verification.
    UnverifiedList,
    /// Comment feed.
    #[default]
    CommentList,
}

impl DetailMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::UnverifiedList => "list.unverifieds",
            Self::CommentList => "list.comments",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "page" => Some(Self::Page),
            "list.unverifieds" => Some(Self::UnverifiedList),
            "list.comments" => Some(Self::CommentList),
            _ => None,
        }
    }
}

impl Display for DetailMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed view over a [`LocalStateRepository`].
pub struct LocalState<R: LocalStateRepository> {
    repo: R,
}

impl<R: LocalStateRepository> LocalState<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Reads `key`, removing the stored value when it is an artifact.
    pub fn read(&self, key: &str) -> LocalStateResult<Option<String>> {
        let Some(value) = self.repo.get(key)? else {
            return Ok(None);
        };
        let trimmed = value.trim();
        if trimmed.is_empty() || ARTIFACT_VALUES.contains(&trimmed) {
            self.repo.remove(key)?;
            return Ok(None);
        }
        Ok(Some(value))
    }

    pub fn selected_page(&self) -> LocalStateResult<Option<RecordId>> {
        Ok(self.read(KEY_SELECTED_PAGE)?.map(RecordId::from))
    }

    pub fn set_selected_page(&self, id: &RecordId) -> LocalStateResult<()> {
        self.repo.set(KEY_SELECTED_PAGE, id.as_str())
    }

    pub fn clear_selected_page(&self) -> LocalStateResult<()> {
        self.repo.remove(KEY_SELECTED_PAGE)?;
        Ok(())
    }

    pub fn detail_mode(&self) -> LocalStateResult<DetailMode> {
        Ok(self
            .read(KEY_DETAIL_MODE)?
            .and_then(|value| DetailMode::parse(value.trim()))
            .unwrap_or_default())
    }

    pub fn set_detail_mode(&self, mode: DetailMode) -> LocalStateResult<()> {
        self.repo.set(KEY_DETAIL_MODE, mode.as_str())
    }

    pub fn expanded_organizers(&self) -> LocalStateResult<Vec<RecordId>> {
        let Some(value) = self.read(KEY_EXPANDED_ORGANIZERS)? else {
            return Ok(Vec::new());
        };
        Ok(value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty() && !ARTIFACT_VALUES.contains(item))
            .map(RecordId::new)
            .collect())
    }

    /// Stores the expanded ids; an empty set removes the key.
    ///
    /// Ids are joined with `,` unescaped. Store-issued ids are UUIDs and
    /// never contain a comma; any other id must not either.
    pub fn set_expanded_organizers<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a RecordId>,
    ) -> LocalStateResult<()> {
        let joined = ids
            .into_iter()
            .map(RecordId::as_str)
            .collect::<Vec<_>>()
            .join(",");
        if joined.is_empty() {
            self.repo.remove(KEY_EXPANDED_ORGANIZERS)?;
            return Ok(());
        }
        self.repo.set(KEY_EXPANDED_ORGANIZERS, &joined)
    }
}

#[cfg(test)]
mod tests {
    use super::{DetailMode, LocalState, LocalStateRepository, LocalStateResult};
    use crate::model::record::RecordId;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryRepo {
        values: RefCell<HashMap<String, String>>,
    }

    impl LocalStateRepository for MemoryRepo {
        fn get(&self, key: &str) -> LocalStateResult<Option<String>> {
            Ok(self.values.borrow().get(key).cloned())
        }

        fn set(&self, key: &str, value: &str) -> LocalStateResult<()> {
            self.values
                .borrow_mut()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }

        fn remove(&self, key: &str) -> LocalStateResult<bool> {
            Ok(self.values.borrow_mut().remove(key).is_some())
        }
    }

    #[test]
    fn artifact_values_read_as_absent_and_are_removed() {
        let state = LocalState::new(MemoryRepo::default());
        for artifact in ["null", "undefined", "  "] {
            state.repository().set("selected_page_id", artifact).unwrap();

            assert_eq!(state.selected_page().unwrap(), None);
            assert_eq!(state.repository().get("selected_page_id").unwrap(), None);
        }
    }

    #[test]
    fn detail_mode_defaults_to_comment_list() {
        let state = LocalState::new(MemoryRepo::default());
        assert_eq!(state.detail_mode().unwrap(), DetailMode::CommentList);

        state.repository().set("detail_mode", "sideways").unwrap();
        assert_eq!(state.detail_mode().unwrap(), DetailMode::CommentList);

        state.set_detail_mode(DetailMode::UnverifiedList).unwrap();
        assert_eq!(state.detail_mode().unwrap(), DetailMode::UnverifiedList);
    }

    #[test]
    fn expanded_organizers_skip_blank_segments() {
        let state = LocalState::new(MemoryRepo::default());
        state
            .repository()
            .set("expanded_organizers", "a, ,b,null")
            .unwrap();

        assert_eq!(
            state.expanded_organizers().unwrap(),
            vec![RecordId::new("a"), RecordId::new("b")]
        );
    }

    #[test]
    fn empty_expanded_set_removes_key() {
        let state = LocalState::new(MemoryRepo::default());
        state
            .set_expanded_organizers(&[RecordId::new("a")])
            .unwrap();
        state.set_expanded_organizers(&Vec::<RecordId>::new()).unwrap();

        assert_eq!(state.repository().get("expanded_organizers").unwrap(), None);
    }

    #[test]
    fn uuid_ids_survive_the_joined_form() {
        let state = LocalState::new(MemoryRepo::default());
        let ids: Vec<RecordId> = (0..3)
            .map(|_| RecordId::new(uuid::Uuid::new_v4().to_string()))
            .collect();

        state.set_expanded_organizers(&ids).unwrap();

        assert_eq!(state.expanded_organizers().unwrap(), ids);
    }
}
