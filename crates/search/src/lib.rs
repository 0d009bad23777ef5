//! Full-text search, ranking, and hybrid fusion over the graph store
//! (spec §4.10).
//!
//! - [`query`] — FTS5 `MATCH` expression compilation (C10)
//! - [`ranking`] — multiplicative weight ranking on top of FTS5's base rank
//! - [`facets`] — node-type/owner/tag/age facet counts over a result set
//! - [`similarity`] — Jaccard "find similar nodes"
//! - [`hybrid`] — fusion of text, graph-context, and similarity branches
//! - [`autocomplete`] — node-name and `#tag` prefix suggestions
//! - [`tokenizer`] — shared word tokenization used by the branches above

#![warn(missing_docs)]

pub mod autocomplete;
pub mod facets;
pub mod hybrid;
pub mod query;
pub mod ranking;
pub mod similarity;
pub mod tokenizer;

pub use autocomplete::{suggest, Suggestion, MIN_PREFIX_LEN};
pub use facets::{compute as compute_facets, AgeBucket, FacetReport};
pub use hybrid::{fuse, BranchRanking, BranchWeights, FusedHit, FusionMode};
pub use query::{compile, CompiledQuery};
pub use ranking::{search, RankWeights, SearchHit};
pub use similarity::{find_similar, SimilarNode};
pub use tokenizer::{tokenize, tokenize_unique};
