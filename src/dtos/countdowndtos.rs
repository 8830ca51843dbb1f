use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::countdownmodel::CountdownChanges;

#[derive(Debug, Deserialize, Serialize, Validate)]
pub struct CreateCountdownDto {
    #[validate(length(min = 1, max = 200, message = "Title must be between 1 and 200 characters"))]
    pub title: String,

    #[validate(length(max = 2000, message = "Description cannot exceed 2000 characters"))]
    pub description: Option<String>,

    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize, Serialize, Validate)]
pub struct UpdateCountdownDto {
    #[validate(length(min = 1, max = 200, message = "Title must be between 1 and 200 characters"))]
    pub title: Option<String>,

    #[validate(length(max = 2000, message = "Description cannot exceed 2000 characters"))]
    pub description: Option<String>,

    pub ends_at: Option<DateTime<Utc>>,
}

impl UpdateCountdownDto {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.ends_at.is_none()
    }
}

impl From<UpdateCountdownDto> for CountdownChanges {
    fn from(dto: UpdateCountdownDto) -> Self {
        CountdownChanges {
            title: dto.title,
            description: dto.description,
            ends_at: dto.ends_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CountdownQueryDto {
    pub active_only: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_update_keeps_unset_fields_empty() {
        let dto: UpdateCountdownDto = serde_json::from_str(r#"{"title":"Black Friday"}"#).unwrap();
        assert!(dto.validate().is_ok());
        assert!(!dto.is_empty());

        let changes: CountdownChanges = dto.into();
        assert_eq!(changes.title.as_deref(), Some("Black Friday"));
        assert!(changes.description.is_none());
        assert!(changes.ends_at.is_none());

        assert!(UpdateCountdownDto::default().is_empty());
    }

    #[test]
    fn blank_title_is_rejected() {
        let dto = UpdateCountdownDto {
            title: Some(String::new()),
            ..Default::default()
        };
        assert!(dto.validate().is_err());
    }
}
