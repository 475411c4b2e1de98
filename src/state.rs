use crate::models::{sort_newest_first, Comment, Poem, PoemDetail, User};

/// Everything the views read. Never mutated in place: each transition
/// produces a new value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppState {
    pub user: Option<User>,
    pub poems: Vec<Poem>,
    pub favorites: Vec<Poem>,
    pub comments: Vec<Comment>,
    pub current_poem: Option<PoemDetail>,
    pub search_results: Option<Vec<Poem>>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl AppState {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn is_favorite(&self, poem_id: &str) -> bool {
        self.favorites.iter().any(|p| p.id == poem_id)
    }

    /// A poem already held somewhere in state.
    pub fn find_poem(&self, poem_id: &str) -> Option<&Poem> {
        self.poems
            .iter()
            .chain(self.search_results.iter().flatten())
            .chain(self.current_poem.iter().map(|d| &d.poem))
            .find(|p| p.id == poem_id)
    }
}

/// The closed set of state transitions.
#[derive(Debug, Clone)]
pub enum Mutation {
    SetUser(Option<User>),
    SetPoems(Vec<Poem>),
    AddPoem(Poem),
    SetCurrentPoem(Option<PoemDetail>),
    SetSearchResults(Option<Vec<Poem>>),
    SetFavorites(Vec<Poem>),
    AddFavorite(Poem),
    RemoveFavorite(String),
    SetComments(Vec<Comment>),
    AddComment(Comment),
    SetLoading(bool),
    SetError(Option<String>),
}

pub fn reduce(state: &AppState, mutation: Mutation) -> AppState {
    let mut next = state.clone();
    match mutation {
        Mutation::SetUser(user) => next.user = user,
        Mutation::SetPoems(poems) => next.poems = poems,
        Mutation::AddPoem(poem) => {
            next.poems.retain(|p| p.id != poem.id);
            next.poems.insert(0, poem);
        }
        Mutation::SetCurrentPoem(detail) => next.current_poem = detail,
        Mutation::SetSearchResults(results) => next.search_results = results,
        Mutation::SetFavorites(favorites) => next.favorites = favorites,
        Mutation::AddFavorite(poem) => {
            if !next.is_favorite(&poem.id) {
                next.favorites.push(poem);
            }
        }
        Mutation::RemoveFavorite(poem_id) => next.favorites.retain(|p| p.id != poem_id),
        Mutation::SetComments(mut comments) => {
            sort_newest_first(&mut comments);
            next.comments = comments;
        }
        Mutation::AddComment(comment) => {
            if let Some(detail) = next.current_poem.as_mut() {
                if detail.poem.id == comment.poem_id {
                    detail.comments.insert(0, comment.clone());
                }
            }
            next.comments.insert(0, comment);
        }
        Mutation::SetLoading(loading) => next.is_loading = loading,
        Mutation::SetError(error) => next.error = error,
    }
    next
}
