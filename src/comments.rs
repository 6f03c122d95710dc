use std::collections::HashMap;

pub use crate::api::Comment;

/// Longest parent quote shown above a reply, in characters.
pub const EXCERPT_CHARS: usize = 140;

/// Turns the backend's flat, unordered comment list into the display order:
/// oldest first, ties broken by id, with each reply carrying a quoted
/// excerpt of its parent. Replies stay in the flat sequence rather than
/// being grouped under their parents.
pub fn resolve(mut comments: Vec<Comment>) -> Vec<Comment> {
    let parents = parent_index(&comments);
    for comment in &mut comments {
        attach_parent(comment, &parents);
    }
    comments.sort_by_cached_key(|comment| (comment.created_time(), comment.id));
    comments
}

/// Attaches parent context to a freshly created comment using the same
/// lookup rule as [`resolve`] and appends it, so posting does not require
/// re-fetching the whole thread.
pub fn append_created(resolved: &mut Vec<Comment>, mut created: Comment) {
    let parents = parent_index(resolved);
    attach_parent(&mut created, &parents);
    resolved.push(created);
}

fn parent_index(comments: &[Comment]) -> HashMap<i64, (String, String)> {
    comments
        .iter()
        .map(|comment| {
            (
                comment.id,
                (excerpt(&comment.content), comment.author_name.clone()),
            )
        })
        .collect()
}

fn attach_parent(comment: &mut Comment, parents: &HashMap<i64, (String, String)>) {
    let Some(parent_id) = comment.parent_id else {
        comment.parent_excerpt = None;
        comment.parent_author = None;
        return;
    };
    // Server responses sometimes arrive pre-joined; trust them and only
    // trim the quote down to excerpt length.
    if let Some(prejoined) = comment.parent_excerpt.take() {
        comment.parent_excerpt = Some(excerpt(&prejoined));
        return;
    }
    match parents.get(&parent_id) {
        Some((content, author)) => {
            comment.parent_excerpt = Some(content.clone());
            comment.parent_author = Some(author.clone());
        }
        // The parent is not in the loaded set. Render as top-level instead
        // of failing.
        None => {
            comment.parent_id = None;
            comment.parent_author = None;
        }
    }
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => {
            let mut short = trimmed[..cut].trim_end().to_string();
            short.push('…');
            short
        }
        None => trimmed.to_string(),
    }
}
