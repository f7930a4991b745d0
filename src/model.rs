use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A blog article as stored in the `articles` collection.
///
/// `upvotes` and `upvote_ids` only ever change together, through [`Article::upvote`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub name: String,
    #[serde(default)]
    pub upvotes: u32,
    #[serde(default)]
    pub upvote_ids: Vec<String>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub posted_by: String,
    pub text: String,
}

impl Article {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            upvotes: 0,
            upvote_ids: Vec::new(),
            comments: Vec::new(),
        }
    }

    /// A user may upvote when signed in and not already among the voters.
    pub fn can_upvote(&self, uid: Option<&str>) -> bool {
        match uid {
            Some(uid) => !self.upvote_ids.iter().any(|id| id == uid),
            None => false,
        }
    }

    /// Records a vote from `uid`. Returns false, leaving the article untouched, when the user
    /// has already voted or the counter is saturated.
    pub fn upvote(&mut self, uid: &str) -> bool {
        if !self.can_upvote(Some(uid)) {
            return false;
        }
        let Some(upvotes) = self.upvotes.checked_add(1) else {
            return false;
        };
        self.upvotes = upvotes;
        self.upvote_ids.push(uid.to_owned());
        true
    }

    /// First voter id listed more than once, if any.
    pub fn duplicate_voter(&self) -> Option<&str> {
        let mut seen = HashSet::with_capacity(self.upvote_ids.len());
        self.upvote_ids
            .iter()
            .find(|uid| !seen.insert(uid.as_str()))
            .map(String::as_str)
    }

    pub fn add_comment(&mut self, comment: Comment) {
        self.comments.push(comment);
    }
}

/// Response payload: the stored article annotated for the requesting user.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleView {
    #[serde(flatten)]
    pub article: Article,
    pub can_upvote: bool,
}

impl ArticleView {
    pub fn for_user(article: Article, uid: Option<&str>) -> Self {
        let can_upvote = article.can_upvote(uid);
        Self {
            article,
            can_upvote,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NewComment {
    pub text: String,
}
