pub mod collaborative;
pub mod content;
pub mod diversity;
pub mod engine;
pub mod fallback;
pub mod hybrid;
pub mod preference;
pub mod similarity;
pub mod vector_search;

pub use collaborative::CollaborativeScorer;
pub use content::ContentScorer;
pub use diversity::DiversityReRanker;
pub use engine::{RecommendationEngine, RecommendationRequest};
pub use fallback::FallbackChain;
pub use hybrid::MethodWeights;
pub use preference::PreferenceAggregator;
pub use vector_search::VectorSearchService;
