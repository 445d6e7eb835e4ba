//! Intra-process services.
//!
//! Requests carry a [`RequestHeader`] naming the originating client, so
//! the server can route its response back to exactly that client's queue.

use crate::signal::SignalSlot;
use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use embros_core::{
    ClientEndpoint, RequestHeader, Result, ServiceEndpoint, WaitSignal, Waitable,
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        Arc, Weak,
        atomic::{AtomicI64, Ordering},
    },
};
use tracing::debug;

pub(crate) struct ServiceHub<Req, Res> {
    server: Option<(Sender<(RequestHeader, Req)>, Weak<Server<Req, Res>>)>,
    clients: HashMap<u64, (Sender<(i64, Res)>, Weak<Client<Req, Res>>)>,
}

impl<Req, Res> ServiceHub<Req, Res> {
    pub(crate) fn new() -> Self {
        Self {
            server: None,
            clients: HashMap::new(),
        }
    }

    pub(crate) fn bind_server(hub: &Arc<Mutex<Self>>) -> Arc<Server<Req, Res>> {
        let (sender, receiver) = unbounded();
        let server = Arc::new(Server {
            receiver,
            hub: hub.clone(),
            signal: SignalSlot::new(),
        });
        let mut guard = hub.lock();
        if guard.server.is_some() {
            debug!("replacing existing service server");
        }
        guard.server = Some((sender, Arc::downgrade(&server)));
        server
    }

    pub(crate) fn bind_client(hub: &Arc<Mutex<Self>>, client_id: u64) -> Arc<Client<Req, Res>> {
        let (sender, receiver) = unbounded();
        let client = Arc::new(Client {
            client_id,
            receiver,
            hub: hub.clone(),
            signal: SignalSlot::new(),
            next_sequence: AtomicI64::new(1),
        });
        hub.lock()
            .clients
            .insert(client_id, (sender, Arc::downgrade(&client)));
        client
    }
}

/// Server side of one service.
pub struct Server<Req, Res> {
    receiver: Receiver<(RequestHeader, Req)>,
    hub: Arc<Mutex<ServiceHub<Req, Res>>>,
    signal: SignalSlot,
}

impl<Req, Res> Waitable for Server<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    fn ready(&self) -> bool {
        !self.receiver.is_empty()
    }

    fn attach(&self, signal: &Arc<WaitSignal>) {
        self.signal.set(signal);
    }
}

impl<Req, Res> ServiceEndpoint<Req, Res> for Server<Req, Res>
where
    Req: Send + 'static,
    Res: Clone + Send + 'static,
{
    fn try_take_request(&self) -> Result<Option<(RequestHeader, Req)>> {
        match self.receiver.try_recv() {
            Ok(request) => Ok(Some(request)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Ok(None),
        }
    }

    fn send_response(&self, header: &RequestHeader, response: &Res) -> Result<()> {
        let mut hub = self.hub.lock();
        let mut gone = false;
        match hub.clients.get(&header.client_id) {
            Some((sender, client)) => match client.upgrade() {
                Some(client) => {
                    if sender.send((header.sequence, response.clone())).is_ok() {
                        client.signal.notify();
                    }
                }
                None => gone = true,
            },
            None => debug!(client_id = header.client_id, "response for unknown client"),
        }
        if gone {
            hub.clients.remove(&header.client_id);
        }
        Ok(())
    }
}

/// Client side of one service.
pub struct Client<Req, Res> {
    client_id: u64,
    receiver: Receiver<(i64, Res)>,
    hub: Arc<Mutex<ServiceHub<Req, Res>>>,
    signal: SignalSlot,
    next_sequence: AtomicI64,
}

impl<Req, Res> Waitable for Client<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    fn ready(&self) -> bool {
        !self.receiver.is_empty()
    }

    fn attach(&self, signal: &Arc<WaitSignal>) {
        self.signal.set(signal);
    }
}

impl<Req, Res> ClientEndpoint<Req, Res> for Client<Req, Res>
where
    Req: Clone + Send + 'static,
    Res: Send + 'static,
{
    fn send_request(&self, request: &Req) -> Result<i64> {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let header = RequestHeader {
            client_id: self.client_id,
            sequence,
        };
        let hub = self.hub.lock();
        match &hub.server {
            Some((sender, server)) => match server.upgrade() {
                Some(server) => {
                    if sender.send((header, request.clone())).is_ok() {
                        server.signal.notify();
                    }
                }
                None => debug!("request sent to a dropped server"),
            },
            None => debug!("request sent with no server bound"),
        }
        Ok(sequence)
    }

    fn try_take_response(&self) -> Result<Option<(i64, Res)>> {
        match self.receiver.try_recv() {
            Ok(response) => Ok(Some(response)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let hub = Arc::new(Mutex::new(ServiceHub::<u32, u32>::new()));
        let server = ServiceHub::bind_server(&hub);
        let client = ServiceHub::bind_client(&hub, 1);

        let sequence = client.send_request(&20).unwrap();
        let (header, request) = server.try_take_request().unwrap().unwrap();
        assert_eq!(request, 20);
        assert_eq!(header.sequence, sequence);

        server.send_response(&header, &(request + 1)).unwrap();
        let (answered, response) = client.try_take_response().unwrap().unwrap();
        assert_eq!(answered, sequence);
        assert_eq!(response, 21);
    }

    #[test]
    fn test_response_routed_per_client() {
        let hub = Arc::new(Mutex::new(ServiceHub::<u32, u32>::new()));
        let server = ServiceHub::bind_server(&hub);
        let first = ServiceHub::bind_client(&hub, 1);
        let second = ServiceHub::bind_client(&hub, 2);

        first.send_request(&1).unwrap();
        second.send_request(&2).unwrap();

        while let Some((header, request)) = server.try_take_request().unwrap() {
            server.send_response(&header, &(request * 10)).unwrap();
        }

        assert_eq!(first.try_take_response().unwrap().unwrap().1, 10);
        assert_eq!(second.try_take_response().unwrap().unwrap().1, 20);
        assert!(first.try_take_response().unwrap().is_none());
    }
}
