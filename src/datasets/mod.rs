use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::pipelines::text_classification;

/// The labelled orientation training set
pub mod orientation;

/// Unlabelled corpora for bulk classification
pub mod corpus;

pub use corpus::Corpus;

/// A single post with an optional orientation label
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, new)]
pub struct Sample {
    /// The post text
    pub text: String,

    /// The orientation class id, if labelled
    pub label: Option<usize>,
}

impl text_classification::Item for Sample {
    fn input(&self) -> &str {
        &self.text
    }

    fn class_id(&self) -> Option<usize> {
        self.label
    }
}
