#[cfg(feature = "desktop")]
pub mod detector;
pub mod estimator;
pub mod keypoint;
pub mod normalize;
#[cfg(feature = "desktop")]
pub mod preprocess;
pub mod similarity;

#[cfg(feature = "desktop")]
pub use detector::MoveNetEstimator;
pub use estimator::{detect_reference, PoseEstimator, ReferencePose, ReferenceSlot, ReferenceSource};
pub use keypoint::{JointName, Keypoint, Pose};
pub use normalize::{BodyFrame, NormalizedVector, Normalizer, CANONICAL_JOINTS, VECTOR_LEN};
#[cfg(feature = "desktop")]
pub use preprocess::preprocess_for_movenet;
pub use similarity::{cosine_score, similarity, to_percent};
