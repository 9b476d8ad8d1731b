pub mod form;
pub mod page;
pub mod question;

pub use form::{Activity, ActivityStatus, FormDefinition, ResponseType, SectionRef};
pub use page::{Page, Section};
pub use question::{AnswerType, ColumnSize, Question, QuestionMetadata, QuestionOption};
