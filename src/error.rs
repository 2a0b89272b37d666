use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Unauthenticated(&'static str),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0}")]
    NotFound(&'static str),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("{0}")]
    DatabaseError(#[from] mongodb::error::Error),

    #[error("{0}")]
    BSONSerError(#[from] bson::ser::Error),

    #[error("{0}")]
    BSONDeError(#[from] bson::de::Error),

    #[error("{0}")]
    UpstreamError(#[from] reqwest::Error),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorJson {
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<serde_json::Value>,
    r#type: String,
    message: String,
}

impl From<Error> for ErrorJson {
    fn from(err: Error) -> Self {
        let message = err.to_string();

        let r#type = err.to_string_variant();

        let errors = match err {
            Error::ValidationError(err) => serde_json::to_value(err).ok(),
            Error::Unauthenticated(..)
            | Error::Forbidden(..)
            | Error::NotFound(..)
            | Error::InvalidArgument(..)
            | Error::DatabaseError(..)
            | Error::BSONSerError(..)
            | Error::BSONDeError(..)
            | Error::UpstreamError(..) => None,
        };

        Self {
            errors,
            message,
            r#type,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        tracing::error!("error: {:?}", self);
        let status = match self {
            Self::Unauthenticated(..) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(..) => StatusCode::FORBIDDEN,
            Self::NotFound(..) => StatusCode::NOT_FOUND,
            Self::InvalidArgument(..) | Self::ValidationError(..) => StatusCode::BAD_REQUEST,
            Self::DatabaseError(..)
            | Self::BSONSerError(..)
            | Self::BSONDeError(..)
            | Self::UpstreamError(..) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let error = ErrorJson::from(self);

        (status, Json(error)).into_response()
    }
}

impl Error {
    pub fn to_string_variant(&self) -> String {
        macro_rules! match_var {
            ($id:ident !) => {
                Self::$id
            };
            ($id:ident (..)) => {
                Self::$id(..)
            };
            ($id:ident {..}) => {
                Self::$id { .. }
            };
        }

        macro_rules! variant {
            ($($name:ident $tt:tt),+) => {
                match self {
                    $(
                        match_var!($name $tt) => {
                            stringify!($name)
                       }
                    )+
                }
            };
        }

        variant! {
            Unauthenticated(..),
            Forbidden(..),
            NotFound(..),
            InvalidArgument(..),
            ValidationError(..),
            DatabaseError(..),
            BSONSerError(..),
            BSONDeError(..),
            UpstreamError(..)
        }
        .to_string()
    }
}

impl From<axum::extract::rejection::PathRejection> for Error {
    fn from(_value: axum::extract::rejection::PathRejection) -> Self {
        Self::NotFound("resource not found")
    }
}

#[cfg(test)]
mod tests {
    use axum::{http::StatusCode, response::IntoResponse};

    use super::Error;

    fn status_of(err: Error) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(Error::Unauthenticated("no credential")),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(Error::Forbidden("admins only")),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(Error::NotFound("parcel not found")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(Error::InvalidArgument("status is required".to_string())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_variant_name() {
        assert_eq!(
            Error::Forbidden("admins only").to_string_variant(),
            "Forbidden"
        );
        assert_eq!(
            Error::NotFound("rider not found").to_string_variant(),
            "NotFound"
        );
    }
}
