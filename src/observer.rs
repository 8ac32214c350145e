use service::ServiceHandler;

/// Logs every registry event the service reports. The handler runs after
/// the mutation committed and outside any lock, so plain logging is all it
/// should ever do synchronously.
#[derive(Default, Clone)]
pub struct Observer;

impl Observer {
    pub fn new() -> Self {
        Self
    }
}

impl ServiceHandler for Observer {
    fn on_login(&self, id: i64, login: &str) {
        log::info!("peer login: id={id}, login={login:?}");
    }

    fn on_register(&self, id: i64, login: &str) {
        log::info!("peer registered: id={id}, login={login:?}");
    }

    fn on_logout(&self, id: i64, login: &str) {
        log::info!("peer logout: id={id}, login={login:?}");
    }

    fn on_channel_switch(&self, id: i64, login: &str, from: i32, to: i32) {
        log::info!("channel switch: id={id}, login={login:?}, from={from}, to={to}");
    }

    #[cfg(feature = "secure")]
    fn on_private_session(&self, src: i64, dest: i64) {
        log::info!("private session established: src={src}, dest={dest}");
    }

    #[cfg(feature = "secure")]
    fn on_private_closed(&self, src: i64, dest: i64) {
        log::info!("private session closed: src={src}, dest={dest}");
    }
}
