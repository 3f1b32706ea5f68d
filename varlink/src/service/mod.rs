// Copyright (c) 2023 Yan Ka, Chiu.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions
// are met:
// 1. Redistributions of source code must retain the above copyright
//    notice, this list of conditions, and the following disclaimer,
//    without modification, immediately at the beginning of the file.
// 2. The name of the author may not be used to endorse or promote products
//    derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE AUTHOR AND CONTRIBUTORS ``AS IS'' AND
// ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
// IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE
// ARE DISCLAIMED. IN NO EVENT SHALL THE AUTHOR OR CONTRIBUTORS BE LIABLE FOR
// ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
// DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS
// OR SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION)
// HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT
// LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY
// OUT OF THE USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF
// SUCH DAMAGE.

//! The server: a listener, a connection table, per-connection call state
//! and method dispatch to registered handlers. Every service also answers
//! the `org.varlink.service` introspection interface.

use crate::avl::AvlTree;
use crate::error::{Error, Result};
use crate::events::Poller;
use crate::idl::{parse_qualified_name, IdlMarkup, Interface};
use crate::message::{self, CALL_MORE, CALL_ONEWAY, REPLY_CONTINUES};
use crate::stream::{Readiness, Stream};
use crate::transport::{self, PeerCredentials};
use crate::uri::{Protocol, Uri};
use crate::value::{Array, Object};
use std::cell::RefCell;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::rc::Rc;

const SERVICE_DESCRIPTION: &str = "\
# The Varlink Service Interface is provided by every varlink service. It
# describes the service and the interfaces it implements.
interface org.varlink.service

# Get a list of all the interfaces a service provides and information
# about the implementation.
method GetInfo() -> (
  vendor: string,
  product: string,
  version: string,
  url: string,
  interfaces: []string
)

# Get the description of an interface that is implemented by this service.
method GetInterfaceDescription(interface: string) -> (description: string)

# The requested interface was not found.
error InterfaceNotFound (interface: string)

# The requested method was not found.
error MethodNotFound (method: string)

# The interface defines the requested method, but the service does not
# implement it.
error MethodNotImplemented (method: string)

# One of the passed parameters is invalid.
error InvalidParameter (parameter: string)
";

pub const ERROR_INTERFACE_NOT_FOUND: &str = "org.varlink.service.InterfaceNotFound";
pub const ERROR_METHOD_NOT_FOUND: &str = "org.varlink.service.MethodNotFound";
pub const ERROR_METHOD_NOT_IMPLEMENTED: &str = "org.varlink.service.MethodNotImplemented";
pub const ERROR_INVALID_PARAMETER: &str = "org.varlink.service.InvalidParameter";

/// A method implementation: the call context, the call parameters and the
/// call flags. Server state travels in the closure's captures.
pub type MethodHandler = Box<dyn FnMut(&Call, &Object, u64) -> Result<()>>;

/// Builder tying method implementations to a parsed interface before it is
/// attached to a service.
pub struct InterfaceRegistration {
    interface: Interface,
    callbacks: Vec<(String, MethodHandler)>,
}

impl InterfaceRegistration {
    pub fn new(description: &str) -> Result<InterfaceRegistration> {
        Ok(InterfaceRegistration {
            interface: Interface::parse(description)?,
            callbacks: Vec::new(),
        })
    }

    /// Attach an implementation to a method the interface declares.
    pub fn method(
        mut self,
        name: &str,
        callback: impl FnMut(&Call, &Object, u64) -> Result<()> + 'static,
    ) -> Result<InterfaceRegistration> {
        if self.interface.get_method(name).is_none() {
            return Err(Error::MethodNotFound);
        }

        self.callbacks.push((name.to_string(), Box::new(callback)));
        Ok(self)
    }

    pub fn interface(&self) -> &Interface {
        &self.interface
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Active,
    Streaming,
    Completed,
}

struct ConnectionState {
    stream: Stream,
    credentials: Option<PeerCredentials>,
    call: Option<Call>,
}

type ConnectionRef = Rc<RefCell<ConnectionState>>;

struct CallInner {
    connection: ConnectionRef,
    poller: Rc<Poller>,
    method: String,
    parameters: Object,
    flags: u64,
    state: CallState,
    canceled: Option<Box<dyn FnMut()>>,
}

/// One in-flight method invocation. The handle is cheap to clone; a
/// handler that wants to finish the call later keeps a clone and returns.
#[derive(Clone)]
pub struct Call {
    inner: Rc<RefCell<CallInner>>,
}

impl Call {
    fn new(
        connection: ConnectionRef,
        poller: Rc<Poller>,
        method: String,
        parameters: Object,
        flags: u64,
    ) -> Call {
        Call {
            inner: Rc::new(RefCell::new(CallInner {
                connection,
                poller,
                method,
                parameters,
                flags,
                state: CallState::Active,
                canceled: None,
            })),
        }
    }

    pub fn method(&self) -> String {
        self.inner.borrow().method.clone()
    }

    pub fn parameters(&self) -> Object {
        self.inner.borrow().parameters.clone()
    }

    pub fn flags(&self) -> u64 {
        self.inner.borrow().flags
    }

    pub fn state(&self) -> CallState {
        self.inner.borrow().state
    }

    /// Credentials of the calling peer, on unix transports.
    pub fn credentials(&self) -> Option<PeerCredentials> {
        let inner = self.inner.borrow();
        let connection = inner.connection.borrow();
        connection.credentials
    }

    /// Runs if the peer hangs up while this call is unfinished.
    pub fn set_canceled_callback(&self, callback: impl FnMut() + 'static) {
        self.inner.borrow_mut().canceled = Some(Box::new(callback));
    }

    /// Send a success reply. `REPLY_CONTINUES` keeps the call open and is
    /// only allowed while the call asked for more; the final reply releases
    /// the call and frees the connection for the next one. Replies to
    /// one-way calls are swallowed.
    pub fn reply(&self, parameters: Option<Object>, flags: u64) -> Result<()> {
        self.finish(None, parameters, flags)
    }

    /// Send an error reply; this always terminates the call.
    pub fn reply_error(&self, error: &str, parameters: Option<Object>) -> Result<()> {
        self.finish(Some(error), parameters, 0)
    }

    pub fn reply_invalid_parameter(&self, parameter: &str) -> Result<()> {
        let parameters = Object::new();
        parameters.set("parameter", parameter)?;
        self.finish(Some(ERROR_INVALID_PARAMETER), Some(parameters), 0)
    }

    fn finish(&self, error: Option<&str>, parameters: Option<Object>, flags: u64) -> Result<()> {
        let mut inner = self.inner.borrow_mut();

        let connection = inner.connection.clone();
        {
            // only the connection's current call may answer
            let connection = connection.borrow();
            match &connection.call {
                Some(call) if Rc::ptr_eq(&call.inner, &self.inner) => {}
                _ => return Err(Error::InvalidCall),
            }
        }

        let continues = flags & REPLY_CONTINUES != 0;
        if continues && inner.flags & CALL_MORE == 0 {
            return Err(Error::InvalidCall);
        }

        if inner.flags & CALL_ONEWAY == 0 {
            let reply = message::pack_reply(error, Some(parameters.unwrap_or_default()), flags)?;

            let mut connection = connection.borrow_mut();
            connection.stream.write(&reply)?;

            let fd = connection.stream.fd();
            let events = connection.stream.events();
            inner
                .poller
                .modify(unsafe { BorrowedFd::borrow_raw(fd) }, events, fd as u64)?;
        }

        if continues {
            inner.state = CallState::Streaming;
            return Ok(());
        }

        inner.state = CallState::Completed;
        drop(inner);
        connection.borrow_mut().call = None;
        Ok(())
    }

    /// Peer hang-up while the call was unfinished.
    fn cancel(&self) {
        let callback = {
            let mut inner = self.inner.borrow_mut();
            inner.state = CallState::Completed;
            inner.canceled.take()
        };
        if let Some(mut callback) = callback {
            callback();
        }
    }
}

struct RegisteredInterface {
    interface: Interface,
    callbacks: AvlTree<String, MethodHandler>,
}

/// A listening service: identity metadata, registered interfaces, the
/// connection table and the readiness loop that feeds dispatch.
pub struct Service {
    vendor: String,
    product: String,
    version: String,
    url: String,
    protocol: Protocol,
    listen_fd: OwnedFd,
    unlink_path: Option<PathBuf>,
    poller: Rc<Poller>,
    interfaces: AvlTree<String, RegisteredInterface>,
    connections: AvlTree<RawFd, ConnectionRef>,
}

impl Service {
    /// Bind to `address`, or adopt `listen_fd` when a caller (e.g. socket
    /// activation) already did.
    pub fn new(
        vendor: &str,
        product: &str,
        version: &str,
        url: &str,
        address: &str,
        listen_fd: Option<OwnedFd>,
    ) -> Result<Service> {
        let uri = Uri::parse(address, false)?;

        let (listen_fd, unlink_path) = match listen_fd {
            Some(fd) => (fd, None),
            None => {
                let listener = transport::listen(&uri)?;
                (listener.fd, listener.unlink_path)
            }
        };

        let poller = Rc::new(Poller::new()?);
        poller.add(
            listen_fd.as_fd(),
            Readiness::READABLE,
            listen_fd.as_raw_fd() as u64,
        )?;

        let mut service = Service {
            vendor: vendor.to_string(),
            product: product.to_string(),
            version: version.to_string(),
            url: url.to_string(),
            protocol: uri.protocol,
            listen_fd,
            unlink_path,
            poller,
            interfaces: AvlTree::new(),
            connections: AvlTree::new(),
        };

        service.add_interface(InterfaceRegistration::new(SERVICE_DESCRIPTION)?)?;

        tracing::debug!(address, "service listening");
        Ok(service)
    }

    pub fn add_interface(&mut self, registration: InterfaceRegistration) -> Result<()> {
        let InterfaceRegistration {
            interface,
            callbacks,
        } = registration;

        let mut table = AvlTree::new();
        for (name, callback) in callbacks {
            table.insert(name, callback).map_err(|_| Error::Panic)?;
        }

        let name = interface.name().to_string();
        self.interfaces
            .insert(
                name,
                RegisteredInterface {
                    interface,
                    callbacks: table,
                },
            )
            .map_err(|_| Error::DuplicateInterface)
    }

    pub fn get_interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces.get(name).map(|entry| &entry.interface)
    }

    /// The descriptor to hand to an external readiness multiplexer; it
    /// becomes readable whenever `process_events` has work to do.
    pub fn fd(&self) -> RawFd {
        self.poller.fd()
    }

    /// Drain all pending readiness: accept connections, read calls,
    /// dispatch handlers, flush replies. Never blocks.
    pub fn process_events(&mut self) -> Result<()> {
        loop {
            let Some((token, events)) = self.poller.wait(Some(0))? else {
                return Ok(());
            };

            if token == self.listen_fd.as_raw_fd() as u64 {
                if !events.readable {
                    return Err(Error::Panic);
                }
                self.accept_connection();
            } else {
                let fd = token as RawFd;
                let Some(connection) = self.connections.get(&fd).cloned() else {
                    continue;
                };

                if let Err(error) = self.dispatch_connection(&connection, fd, events) {
                    tracing::debug!(fd, %error, "closing connection");
                    self.close_connection(fd);
                }
            }
        }
    }

    fn accept_connection(&mut self) {
        match transport::accept(self.protocol, self.listen_fd.as_raw_fd()) {
            Ok((fd, credentials)) => {
                let raw = fd.as_raw_fd();
                let stream = Stream::new(fd);

                if self
                    .poller
                    .add(
                        unsafe { BorrowedFd::borrow_raw(raw) },
                        Readiness::READABLE,
                        raw as u64,
                    )
                    .is_err()
                {
                    return;
                }

                let state = Rc::new(RefCell::new(ConnectionState {
                    stream,
                    credentials,
                    call: None,
                }));

                let _ = self.connections.insert(raw, state);
                tracing::debug!(fd = raw, "accepted connection");
            }
            // A denied or failed peer never takes the service down.
            Err(error) => tracing::debug!(%error, "connection not admitted"),
        }
    }

    fn dispatch_connection(
        &mut self,
        connection: &ConnectionRef,
        fd: RawFd,
        events: Readiness,
    ) -> Result<()> {
        {
            let mut state = connection.borrow_mut();
            state.stream.dispatch(events)?;

            // the peer lost interest in its pending call
            if state.stream.hup() && state.call.is_some() {
                return Err(Error::ConnectionClosed);
            }
        }

        loop {
            let message = {
                let mut state = connection.borrow_mut();
                if state.call.is_some() {
                    break;
                }
                match state.stream.read()? {
                    Some(message) => message,
                    None => break,
                }
            };

            let (method, parameters, flags) = message::unpack_call(&message)?;
            let call = Call::new(
                connection.clone(),
                self.poller.clone(),
                method,
                parameters,
                flags,
            );

            connection.borrow_mut().call = Some(call.clone());
            self.dispatch_call(&call)?;

            // one-way calls never reply; free the connection right away
            if flags & CALL_ONEWAY != 0 {
                call.inner.borrow_mut().state = CallState::Completed;
                connection.borrow_mut().call = None;
            }
        }

        let state = connection.borrow();
        if state.stream.hup() && state.call.is_none() && !state.stream.has_pending_out() {
            return Err(Error::ConnectionClosed);
        }

        self.poller.modify(
            unsafe { BorrowedFd::borrow_raw(fd) },
            state.stream.events(),
            fd as u64,
        )?;

        Ok(())
    }

    fn dispatch_call(&mut self, call: &Call) -> Result<()> {
        let method = call.method();
        tracing::debug!(method, "dispatch");

        let Ok((interface_name, method_name)) = parse_qualified_name(&method) else {
            return call.reply_error(ERROR_METHOD_NOT_FOUND, None);
        };

        if interface_name == "org.varlink.service" {
            return self.dispatch_builtin(call, method_name);
        }

        let Some(entry) = self.interfaces.get_mut(interface_name) else {
            return call.reply_error(ERROR_INTERFACE_NOT_FOUND, None);
        };

        if entry.interface.get_method(method_name).is_none() {
            return call.reply_error(ERROR_METHOD_NOT_FOUND, None);
        }

        let Some(callback) = entry.callbacks.get_mut(method_name) else {
            return call.reply_error(ERROR_METHOD_NOT_IMPLEMENTED, None);
        };

        let parameters = call.parameters();
        let flags = call.flags();
        callback(call, &parameters, flags)
    }

    fn dispatch_builtin(&mut self, call: &Call, method: &str) -> Result<()> {
        match method {
            "GetInfo" => {
                let interfaces = Array::new();
                for (name, _) in self.interfaces.iter() {
                    interfaces.append(name.as_str())?;
                }

                let info = Object::new();
                info.set("vendor", self.vendor.as_str())?;
                info.set("product", self.product.as_str())?;
                info.set("version", self.version.as_str())?;
                info.set("url", self.url.as_str())?;
                info.set("interfaces", interfaces)?;

                call.reply(Some(info), 0)
            }
            "GetInterfaceDescription" => {
                let Ok(name) = call.parameters().get_string("interface") else {
                    return call.reply_invalid_parameter("interface");
                };

                let Some(entry) = self.interfaces.get(name.as_str()) else {
                    return call.reply_error(ERROR_INTERFACE_NOT_FOUND, None);
                };

                let out = Object::new();
                out.set(
                    "description",
                    entry.interface.write_description(0, &IdlMarkup::default()),
                )?;
                call.reply(Some(out), 0)
            }
            _ => call.reply_error(ERROR_METHOD_NOT_FOUND, None),
        }
    }

    fn close_connection(&mut self, fd: RawFd) {
        let Ok(connection) = self.connections.remove(&fd) else {
            return;
        };

        let call = {
            let mut state = connection.borrow_mut();
            let _ = self.poller.remove(unsafe { BorrowedFd::borrow_raw(state.stream.fd()) });
            state.call.take()
        };

        // breaking the connection<->call ownership loop happens here; the
        // cancellation callback runs with the connection already detached
        if let Some(call) = call {
            call.cancel();
        }
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        let fds: Vec<RawFd> = self.connections.iter().map(|(fd, _)| *fd).collect();
        for fd in fds {
            self.close_connection(fd);
        }

        if let Some(path) = &self.unlink_path {
            let _ = std::fs::remove_file(path);
        }
    }
}
