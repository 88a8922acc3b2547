/// Which end of the connection a codec is running on.
///
/// Clients mask every outgoing frame and expect unmasked frames back;
/// servers do the opposite.
pub(crate) trait RolePolicy: Send + Sync + 'static {
    const CLIENT: bool;
    const SERVER: bool = !Self::CLIENT;
}

pub(crate) struct Client;

pub(crate) struct Server;

impl RolePolicy for Client {
    const CLIENT: bool = true;
}

impl RolePolicy for Server {
    const CLIENT: bool = false;
}
