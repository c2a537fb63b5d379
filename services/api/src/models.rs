//! API service models

pub mod course;
pub mod mentoring;
pub mod payment;

pub use course::{
    ContentItem, ContentPatch, Course, CourseFeedback, CourseMaterial, CourseVideo, Enrollment,
    NewMaterial, NewVideo, merge_contents,
};
pub use mentoring::{MentoringChat, MentoringMessage};
pub use payment::{NewPayment, Payment, PaymentStatus};
