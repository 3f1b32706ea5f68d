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

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use std::cell::{Cell, RefCell};
use std::os::fd::BorrowedFd;
use std::path::PathBuf;
use std::rc::Rc;
use varlink::{Connection, Interface, Object, Poller, CALL_MORE, CALL_ONEWAY, REPLY_CONTINUES};

#[derive(Parser, Debug)]
#[clap(name = "varlink", about = "Command-line client for varlink services")]
struct Args {
    #[clap(subcommand)]
    action: Action,
}

#[derive(Parser, Debug)]
enum Action {
    /// Call a method and print the reply
    Call {
        /// Expect multiple replies
        #[clap(short = 'm', long = "more")]
        more: bool,
        /// Do not wait for a reply
        #[clap(long = "oneway")]
        oneway: bool,
        /// ADDRESS/INTERFACE.METHOD, e.g. unix:/run/io.systemd.journal/io.systemd.journal.Monitor
        url: String,
        /// Method parameters as a JSON object
        arguments: Option<String>,
    },
    /// Print information about a service
    Info {
        /// Service address, e.g. unix:/run/org.example.service
        address: String,
    },
    /// Print the description of an interface implemented by a service
    Help {
        /// Service address
        address: String,
        /// Interface name
        interface: String,
    },
    /// Reformat an interface file to its canonical layout
    Format {
        /// Rewrite the file instead of printing
        #[clap(short = 'i', long = "in-place")]
        in_place: bool,
        file: PathBuf,
    },
}

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    match args.action {
        Action::Call {
            more,
            oneway,
            url,
            arguments,
        } => call(&url, arguments.as_deref(), more, oneway),
        Action::Info { address } => info(&address),
        Action::Help { address, interface } => help(&address, &interface),
        Action::Format { in_place, file } => format(&file, in_place),
    }
}

/// Split `ADDRESS/INTERFACE.METHOD` at the last slash.
fn split_url(url: &str) -> Result<(&str, &str), anyhow::Error> {
    let (address, method) = url
        .rsplit_once('/')
        .ok_or_else(|| anyhow!("expected ADDRESS/INTERFACE.METHOD, got {url:?}"))?;
    Ok((address, method))
}

/// Run the connection until `done` flips or it is closed.
fn drive(connection: &mut Connection, done: &Cell<bool>) -> Result<(), anyhow::Error> {
    let fd = connection.fd()?;
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };

    let poller = Poller::new()?;
    poller.add(borrowed, connection.events(), 0)?;

    while !done.get() {
        poller.modify(borrowed, connection.events(), 0)?;
        let Some((_, readiness)) = poller.wait(None)? else {
            continue;
        };
        connection.process_events(readiness)?;
    }
    Ok(())
}

fn call(
    url: &str,
    arguments: Option<&str>,
    more: bool,
    oneway: bool,
) -> Result<(), anyhow::Error> {
    let (address, method) = split_url(url)?;

    let parameters = match arguments {
        Some(text) => Object::from_json(text).context("call arguments")?,
        None => Object::new(),
    };

    let mut flags = 0;
    if more {
        flags |= CALL_MORE;
    }
    if oneway {
        flags |= CALL_ONEWAY;
    }

    let mut connection = Connection::new(address)?;
    tracing::debug!(address, method, "calling");

    let done = Rc::new(Cell::new(false));
    let failed: Rc<RefCell<Option<String>>> = Rc::new(RefCell::new(None));

    let finished = done.clone();
    let failure = failed.clone();
    connection.call(method, Some(parameters), flags, move |_conn, error, parameters, reply_flags| {
        match error {
            Some(error) => {
                *failure.borrow_mut() = Some(error.to_string());
                eprintln!("{}", parameters.to_json_indented());
                finished.set(true);
            }
            None => {
                println!("{}", parameters.to_json_indented());
                if reply_flags & REPLY_CONTINUES == 0 {
                    finished.set(true);
                }
            }
        }
    })?;

    if oneway {
        // push out whatever is still buffered, then leave
        let fd = connection.fd()?;
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        let poller = Poller::new()?;
        poller.add(borrowed, connection.events(), 0)?;
        while connection.events().writable {
            let Some((_, readiness)) = poller.wait(None)? else {
                continue;
            };
            connection.process_events(readiness)?;
            poller.modify(borrowed, connection.events(), 0)?;
        }
        return Ok(());
    }

    drive(&mut connection, &done)?;

    if let Some(error) = failed.borrow().as_ref() {
        bail!("call failed: {error}");
    }
    Ok(())
}

fn info(address: &str) -> Result<(), anyhow::Error> {
    let mut connection = Connection::new(address)?;

    let done = Rc::new(Cell::new(false));
    let finished = done.clone();
    connection.call(
        "org.varlink.service.GetInfo",
        None,
        0,
        move |_conn, error, parameters, _flags| {
            if let Some(error) = error {
                eprintln!("call failed: {error}");
                finished.set(true);
                return;
            }

            for (label, field) in [
                ("Vendor", "vendor"),
                ("Product", "product"),
                ("Version", "version"),
                ("URL", "url"),
            ] {
                println!("{}: {}", label, parameters.get_string(field).unwrap_or_default());
            }

            println!("Interfaces:");
            if let Ok(interfaces) = parameters.get_array("interfaces") {
                for i in 0..interfaces.len() {
                    if let Ok(name) = interfaces.get_string(i) {
                        println!("  {name}");
                    }
                }
            }

            finished.set(true);
        },
    )?;

    drive(&mut connection, &done)
}

fn help(address: &str, interface: &str) -> Result<(), anyhow::Error> {
    let parameters = Object::new();
    parameters.set("interface", interface)?;

    let mut connection = Connection::new(address)?;

    let done = Rc::new(Cell::new(false));
    let finished = done.clone();
    connection.call(
        "org.varlink.service.GetInterfaceDescription",
        Some(parameters),
        0,
        move |_conn, error, parameters, _flags| {
            match error {
                Some(error) => eprintln!("call failed: {error}"),
                None => print!("{}", parameters.get_string("description").unwrap_or_default()),
            }
            finished.set(true);
        },
    )?;

    drive(&mut connection, &done)
}

fn format(file: &PathBuf, in_place: bool) -> Result<(), anyhow::Error> {
    let text = std::fs::read_to_string(file).with_context(|| format!("reading {file:?}"))?;

    let interface =
        Interface::parse(&text).map_err(|error| anyhow!("{}: {}", file.display(), error))?;

    let canonical = interface.to_string();

    if in_place {
        std::fs::write(file, canonical).with_context(|| format!("writing {file:?}"))?;
    } else {
        print!("{canonical}");
    }

    Ok(())
}
