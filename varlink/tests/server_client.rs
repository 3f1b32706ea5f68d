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

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use varlink::{
    Call, Connection, Error, InterfaceRegistration, Object, Readiness, Service, CALL_MORE,
    CALL_ONEWAY, REPLY_CONTINUES,
};

const EXAMPLE: &str = "\
interface org.varlink.example

method Echo(word: string) -> (word: string)

method Later() -> ()

method Stream() -> (n: int)

method Fail() -> ()

method NotImplemented() -> ()
";

struct Fixture {
    service: Service,
    address: String,
    /// the call the Later handler parked
    later: Rc<RefCell<Option<Call>>>,
    /// the streaming call after two continues replies
    stream: Rc<RefCell<Option<Call>>>,
    canceled: Rc<Cell<bool>>,
}

fn example_service(tag: &str) -> Fixture {
    let address = format!("unix:@varlink-e2e-{}-{}", std::process::id(), tag);
    let mut service = Service::new(
        "Varlink",
        "Test Service",
        "0.1",
        "http://varlink.org",
        &address,
        None,
    )
    .unwrap();

    let later: Rc<RefCell<Option<Call>>> = Rc::new(RefCell::new(None));
    let stream: Rc<RefCell<Option<Call>>> = Rc::new(RefCell::new(None));
    let canceled = Rc::new(Cell::new(false));

    let later_slot = later.clone();
    let stream_slot = stream.clone();
    let canceled_flag = canceled.clone();

    let registration = InterfaceRegistration::new(EXAMPLE)
        .unwrap()
        .method("Echo", |call, parameters, _flags| {
            let word = parameters.get_string("word")?;

            // calls over unix sockets carry our own credentials here
            let credentials = call.credentials().unwrap();
            assert_eq!(credentials.pid, std::process::id() as i32);
            assert_eq!(credentials.uid, nix::unistd::getuid().as_raw());

            let out = Object::new();
            out.set("word", word.as_str())?;
            call.reply(Some(out), 0)
        })
        .unwrap()
        .method("Later", move |call, _parameters, _flags| {
            assert!(later_slot.borrow().is_none());
            *later_slot.borrow_mut() = Some(call.clone());
            Ok(())
        })
        .unwrap()
        .method("Stream", move |call, _parameters, flags| {
            assert_ne!(flags & CALL_MORE, 0);

            let flag = canceled_flag.clone();
            call.set_canceled_callback(move || flag.set(true));

            for n in 1..=2i64 {
                let out = Object::new();
                out.set("n", n)?;
                call.reply(Some(out), REPLY_CONTINUES)?;
            }

            // the terminating reply is issued by the test
            *stream_slot.borrow_mut() = Some(call.clone());
            Ok(())
        })
        .unwrap()
        .method("Fail", |_call, _parameters, _flags| Err(Error::Panic))
        .unwrap();

    service.add_interface(registration).unwrap();

    Fixture {
        service,
        address,
        later,
        stream,
        canceled,
    }
}

fn pump(service: &mut Service, connection: &mut Connection, mut done: impl FnMut() -> bool) {
    let both = Readiness::READ_WRITE;

    for _ in 0..2000 {
        service.process_events().unwrap();
        connection.process_events(both).unwrap();
        if done() {
            return;
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    panic!("timed out waiting for replies");
}

fn call_parameters(word: &str) -> Object {
    let parameters = Object::new();
    parameters.set("word", word).unwrap();
    parameters
}

#[test]
fn echo_replies_arrive_in_call_order() {
    let mut fixture = example_service("echo");
    let mut connection = Connection::new(&fixture.address).unwrap();

    let words = ["one", "two", "three", "four", "five"];
    let received: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));

    for word in words {
        let sink = received.clone();
        connection
            .call(
                "org.varlink.example.Echo",
                Some(call_parameters(word)),
                0,
                move |_conn, error, parameters, _flags| {
                    assert_eq!(error, None);
                    sink.borrow_mut()
                        .push(parameters.get_string("word").unwrap());
                },
            )
            .unwrap();
    }

    pump(&mut fixture.service, &mut connection, || {
        received.borrow().len() == words.len()
    });
    assert_eq!(*received.borrow(), words);
}

#[test]
fn echo_wire_bytes_are_exact() {
    let mut fixture = example_service("wire");

    let uri = varlink::Uri::parse(&fixture.address, false).unwrap();
    let fd = varlink::transport::connect(&uri).unwrap();
    let raw = {
        use std::os::fd::AsRawFd;
        fd.as_raw_fd()
    };

    let call = b"{\"method\":\"org.varlink.example.Echo\",\"parameters\":{\"word\":\"hi\"}}\0";
    let written =
        unsafe { nix::libc::write(raw, call.as_ptr() as *const nix::libc::c_void, call.len()) };
    assert_eq!(written, call.len() as isize);

    let mut reply = Vec::new();
    for _ in 0..2000 {
        fixture.service.process_events().unwrap();

        let mut buf = [0u8; 256];
        let n =
            unsafe { nix::libc::read(raw, buf.as_mut_ptr() as *mut nix::libc::c_void, buf.len()) };
        if n > 0 {
            reply.extend_from_slice(&buf[..n as usize]);
            if reply.ends_with(b"\0") {
                break;
            }
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }

    assert_eq!(reply, b"{\"parameters\":{\"word\":\"hi\"}}\0");
}

#[test]
fn streaming_replies_deliver_in_order_until_final() {
    let mut fixture = example_service("stream");
    let mut connection = Connection::new(&fixture.address).unwrap();

    let observed: Rc<RefCell<Vec<(i64, u64)>>> = Rc::new(RefCell::new(Vec::new()));

    let sink = observed.clone();
    connection
        .call(
            "org.varlink.example.Stream",
            None,
            CALL_MORE,
            move |_conn, error, parameters, flags| {
                assert_eq!(error, None);
                sink.borrow_mut()
                    .push((parameters.get_int("n").unwrap(), flags));
            },
        )
        .unwrap();

    pump(&mut fixture.service, &mut connection, || {
        observed.borrow().len() == 2
    });

    // the callback stayed queued across the continues replies; the final
    // reply is the third invocation and removes it
    let call = fixture.stream.borrow_mut().take().unwrap();
    let out = Object::new();
    out.set("n", 3i64).unwrap();
    call.reply(Some(out), 0).unwrap();

    pump(&mut fixture.service, &mut connection, || {
        observed.borrow().len() == 3
    });
    assert_eq!(
        *observed.borrow(),
        [(1, REPLY_CONTINUES), (2, REPLY_CONTINUES), (3, 0)]
    );

    // a late reply to the released call is refused
    assert_eq!(call.reply(None, 0), Err(Error::InvalidCall));

    // and the connection is free for the next call
    let echoed = Rc::new(Cell::new(false));
    let seen = echoed.clone();
    connection
        .call(
            "org.varlink.example.Echo",
            Some(call_parameters("after")),
            0,
            move |_conn, error, parameters, _flags| {
                assert_eq!(error, None);
                assert_eq!(parameters.get_string("word").unwrap(), "after");
                seen.set(true);
            },
        )
        .unwrap();
    pump(&mut fixture.service, &mut connection, || echoed.get());
}

#[test]
fn oneway_calls_get_no_reply() {
    let mut fixture = example_service("oneway");
    let mut connection = Connection::new(&fixture.address).unwrap();

    connection
        .call(
            "org.varlink.example.Echo",
            Some(call_parameters("silent")),
            CALL_ONEWAY,
            |_conn, _error, _parameters, _flags| panic!("one-way calls have no reply"),
        )
        .unwrap();

    // the connection is immediately usable for the next call, and the
    // first reply that arrives belongs to it
    let echoed = Rc::new(Cell::new(false));
    let seen = echoed.clone();
    connection
        .call(
            "org.varlink.example.Echo",
            Some(call_parameters("loud")),
            0,
            move |_conn, error, parameters, _flags| {
                assert_eq!(error, None);
                assert_eq!(parameters.get_string("word").unwrap(), "loud");
                seen.set(true);
            },
        )
        .unwrap();

    pump(&mut fixture.service, &mut connection, || echoed.get());
}

#[test]
fn unknown_targets_are_reported() {
    let mut fixture = example_service("unknown");
    let mut connection = Connection::new(&fixture.address).unwrap();

    let errors: Rc<RefCell<Vec<(String, usize)>>> = Rc::new(RefCell::new(Vec::new()));

    for method in [
        "org.varlink.example.Missing",
        "org.varlink.nowhere.Missing",
        "org.varlink.example.NotImplemented",
    ] {
        let sink = errors.clone();
        connection
            .call(method, None, 0, move |_conn, error, parameters, _flags| {
                sink.borrow_mut()
                    .push((error.unwrap().to_string(), parameters.len()));
            })
            .unwrap();
    }

    pump(&mut fixture.service, &mut connection, || {
        errors.borrow().len() == 3
    });

    assert_eq!(
        *errors.borrow(),
        [
            ("org.varlink.service.MethodNotFound".to_string(), 0),
            ("org.varlink.service.InterfaceNotFound".to_string(), 0),
            ("org.varlink.service.MethodNotImplemented".to_string(), 0),
        ]
    );
}

#[test]
fn deferred_replies_park_the_connection() {
    let mut fixture = example_service("later");
    let mut connection = Connection::new(&fixture.address).unwrap();

    let got_reply = Rc::new(Cell::new(false));
    let seen = got_reply.clone();
    connection
        .call(
            "org.varlink.example.Later",
            None,
            0,
            move |_conn, error, _parameters, _flags| {
                assert_eq!(error, None);
                seen.set(true);
            },
        )
        .unwrap();

    pump(&mut fixture.service, &mut connection, || {
        fixture.later.borrow().is_some()
    });
    assert!(!got_reply.get());

    let call = fixture.later.borrow_mut().take().unwrap();
    call.reply(None, 0).unwrap();

    pump(&mut fixture.service, &mut connection, || got_reply.get());
}

#[test]
fn peer_hangup_cancels_the_active_call() {
    let mut fixture = example_service("cancel");
    let mut connection = Connection::new(&fixture.address).unwrap();

    let streamed = Rc::new(Cell::new(0usize));
    let seen = streamed.clone();
    connection
        .call(
            "org.varlink.example.Stream",
            None,
            CALL_MORE,
            move |_conn, _error, _parameters, _flags| {
                seen.set(seen.get() + 1);
            },
        )
        .unwrap();

    pump(&mut fixture.service, &mut connection, || streamed.get() == 2);
    assert!(!fixture.canceled.get());

    drop(connection);

    for _ in 0..2000 {
        fixture.service.process_events().unwrap();
        if fixture.canceled.get() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    assert!(fixture.canceled.get());
}

#[test]
fn handler_failure_closes_only_that_connection() {
    let mut fixture = example_service("fail");
    let mut failing = Connection::new(&fixture.address).unwrap();
    let mut healthy = Connection::new(&fixture.address).unwrap();

    failing
        .call("org.varlink.example.Fail", None, 0, |_, _, _, _| {
            panic!("the failing handler never replies");
        })
        .unwrap();

    let closed = loop {
        fixture.service.process_events().unwrap();
        match failing.process_events(Readiness::READ_WRITE) {
            Ok(()) => std::thread::sleep(std::time::Duration::from_millis(1)),
            Err(error) => break error,
        }
    };
    assert_eq!(closed, Error::ConnectionClosed);

    let echoed = Rc::new(Cell::new(false));
    let seen = echoed.clone();
    healthy
        .call(
            "org.varlink.example.Echo",
            Some(call_parameters("still here")),
            0,
            move |_conn, error, parameters, _flags| {
                assert_eq!(error, None);
                assert_eq!(parameters.get_string("word").unwrap(), "still here");
                seen.set(true);
            },
        )
        .unwrap();

    pump(&mut fixture.service, &mut healthy, || echoed.get());
}

#[test]
fn builtin_get_info_lists_interfaces() {
    let mut fixture = example_service("info");
    let mut connection = Connection::new(&fixture.address).unwrap();

    let done = Rc::new(Cell::new(false));
    let seen = done.clone();
    connection
        .call(
            "org.varlink.service.GetInfo",
            None,
            0,
            move |_conn, error, parameters, _flags| {
                assert_eq!(error, None);
                assert_eq!(parameters.get_string("vendor").unwrap(), "Varlink");
                assert_eq!(parameters.get_string("product").unwrap(), "Test Service");
                assert_eq!(parameters.get_string("version").unwrap(), "0.1");
                assert_eq!(parameters.get_string("url").unwrap(), "http://varlink.org");

                let interfaces = parameters.get_array("interfaces").unwrap();
                let names: Vec<String> = (0..interfaces.len())
                    .map(|i| interfaces.get_string(i).unwrap())
                    .collect();
                assert_eq!(names, ["org.varlink.example", "org.varlink.service"]);

                seen.set(true);
            },
        )
        .unwrap();

    pump(&mut fixture.service, &mut connection, || done.get());
}

#[test]
fn builtin_interface_description_is_canonical() {
    let mut fixture = example_service("description");
    let mut connection = Connection::new(&fixture.address).unwrap();

    let parameters = Object::new();
    parameters.set("interface", "org.varlink.example").unwrap();

    let done = Rc::new(Cell::new(false));
    let seen = done.clone();
    connection
        .call(
            "org.varlink.service.GetInterfaceDescription",
            Some(parameters),
            0,
            move |_conn, error, parameters, _flags| {
                assert_eq!(error, None);
                let description = parameters.get_string("description").unwrap();
                assert_eq!(
                    description,
                    varlink::Interface::parse(EXAMPLE).unwrap().to_string()
                );
                seen.set(true);
            },
        )
        .unwrap();

    pump(&mut fixture.service, &mut connection, || done.get());

    let parameters = Object::new();
    parameters.set("interface", "org.example.unknown").unwrap();

    let failed = Rc::new(Cell::new(false));
    let seen = failed.clone();
    connection
        .call(
            "org.varlink.service.GetInterfaceDescription",
            Some(parameters),
            0,
            move |_conn, error, _parameters, _flags| {
                assert_eq!(error, Some("org.varlink.service.InterfaceNotFound"));
                seen.set(true);
            },
        )
        .unwrap();

    pump(&mut fixture.service, &mut connection, || failed.get());
}
