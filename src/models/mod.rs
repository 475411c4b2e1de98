mod poem;
mod social;
mod user;

pub use poem::{NewPoem, Poem, PoemDetail};
pub use social::{sort_newest_first, Comment, Favorite, NewComment, Profile, ProfileUpdate};
pub use user::{AuthUser, Session, SignUpOutcome, User};
