use crate::connector::ConnectorError;

/// Pool error.
#[derive(thiserror::Error, Debug)]
#[error(transparent)]
pub struct Error(#[from] anyhow::Error);

impl Error {
    /// `true` if the pool could not hand out a channel because the connector is not connected.
    pub fn is_not_connected(&self) -> bool {
        matches!(
            self.0.downcast_ref::<ConnectorError>(),
            Some(ConnectorError::NotConnected)
        )
    }
}

impl From<ConnectorError> for Error {
    fn from(err: ConnectorError) -> Self {
        Self(err.into())
    }
}

impl From<deadpool::managed::PoolError<Error>> for Error {
    fn from(err: deadpool::managed::PoolError<Error>) -> Self {
        match err {
            deadpool::managed::PoolError::Backend(e) => e,
            err => Self(anyhow::anyhow!("{err}")),
        }
    }
}
