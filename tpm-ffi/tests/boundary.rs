// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

use std::cell::Cell;
use std::ffi::CStr;
use std::rc::Rc;
use std::sync::Mutex;

use tpm_ffi::*;
use tpm_transport::{Result, TpmSession, Transport, TransportError};

/// Echoes a fixed response and counts how often it is dropped.
struct FakeTpm {
    response: Vec<u8>,
    fail: Option<fn() -> TransportError>,
    requests: Rc<Cell<usize>>,
    closes: Rc<Cell<usize>>,
}

impl Transport for FakeTpm {
    fn exchange(&mut self, _request: &[u8]) -> Result<Vec<u8>> {
        self.requests.set(self.requests.get() + 1);
        match self.fail {
            Some(fail) => Err(fail()),
            None => Ok(self.response.clone()),
        }
    }
}

impl Drop for FakeTpm {
    fn drop(&mut self) {
        self.closes.set(self.closes.get() + 1);
    }
}

struct Harness {
    context: TpmObject,
    requests: Rc<Cell<usize>>,
    closes: Rc<Cell<usize>>,
}

fn harness(fail: Option<fn() -> TransportError>) -> Harness {
    // TPM_ST_NO_SESSIONS, size 10, TPM_RC_SUCCESS
    let response = vec![0x80, 0x01, 0x00, 0x00, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x00];
    harness_with(response, fail)
}

fn harness_with(response: Vec<u8>, fail: Option<fn() -> TransportError>) -> Harness {
    let requests = Rc::new(Cell::new(0));
    let closes = Rc::new(Cell::new(0));
    let tpm = FakeTpm {
        response,
        fail,
        requests: requests.clone(),
        closes: closes.clone(),
    };
    Harness {
        context: TpmObject::context(TpmSession::from_transport(tpm)),
        requests,
        closes,
    }
}

/// Serializes tests that read or write `TPM_TRANSPORT_DEVICE`.
static ENV_LOCK: Mutex<()> = Mutex::new(());

const COMMAND: [u8; 12] = [
    0x80, 0x01, 0x00, 0x00, 0x00, 0x0C, 0x00, 0x00, 0x01, 0x7B, 0x00, 0x08,
];

fn submit(context: &TpmObject, response: &mut TpmObject) -> TpmError {
    unsafe { tpm_context_message(context, COMMAND.as_ptr(), COMMAND.len() as u32, response) }
}

fn last_error() -> Option<String> {
    let ptr = tpm_last_error();
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

#[test]
fn test_submit_read_release() {
    tracing_subscriber::fmt::try_init().ok();

    let mut h = harness(None);
    let mut response = TpmObject::empty();

    assert_eq!(submit(&h.context, &mut response), TpmError::Success);
    assert!(last_error().is_none());
    assert_eq!(response.kind(), Some(ObjectKind::Message));

    let data = unsafe { tpm_message_get_data(&response) };
    let length = unsafe { tpm_message_get_length(&response) };
    assert!(!data.is_null());
    assert_eq!(length, 10);
    assert_eq!(unsafe { response.payload.message.length }, 10);
    let bytes = unsafe { std::slice::from_raw_parts(data, length as usize) };
    assert_eq!(&bytes[2..6], &[0x00, 0x00, 0x00, 0x0A]);

    assert_eq!(unsafe { tpm_context_close(&mut response) }, TpmError::Success);
    assert_eq!(response.kind, TPM_OBJECT_NONE);
    assert!(unsafe { tpm_message_get_data(&response) }.is_null());
    assert_eq!(unsafe { tpm_message_get_length(&response) }, 0);

    assert_eq!(h.closes.get(), 0);
    assert_eq!(unsafe { tpm_context_close(&mut h.context) }, TpmError::Success);
    assert_eq!(h.closes.get(), 1);
    assert_eq!(h.context.kind, TPM_OBJECT_NONE);
}

#[test]
fn test_pretagged_response_is_accepted() {
    let mut h = harness(None);
    let mut response = TpmObject {
        kind: TPM_OBJECT_MESSAGE,
        ..TpmObject::empty()
    };
    assert_eq!(submit(&h.context, &mut response), TpmError::Success);
    assert_eq!(unsafe { tpm_message_get_length(&response) }, 10);

    unsafe {
        assert_eq!(tpm_context_close(&mut response), TpmError::Success);
        assert_eq!(tpm_context_close(&mut h.context), TpmError::Success);
    }
}

#[test]
fn test_failed_exchange_leaves_response_unpopulated() {
    let mut h = harness(Some(|| TransportError::ExchangeFailed(0x8028_4008)));
    let mut response = TpmObject::empty();

    assert_eq!(submit(&h.context, &mut response), TpmError::OperationFailed);
    assert_eq!(response.kind, TPM_OBJECT_NONE);
    assert!(unsafe { tpm_message_get_data(&response) }.is_null());
    assert!(last_error().unwrap().contains("0x80284008"));

    assert_eq!(unsafe { tpm_context_close(&mut h.context) }, TpmError::Success);
    assert!(last_error().is_none());
}

#[test]
fn test_empty_response_is_not_a_message() {
    let mut h = harness_with(Vec::new(), None);
    let mut response = TpmObject::empty();

    assert_eq!(submit(&h.context, &mut response), TpmError::OperationFailed);
    assert_eq!(h.requests.get(), 1);
    assert_eq!(response.kind, TPM_OBJECT_NONE);
    assert!(unsafe { tpm_message_get_data(&response) }.is_null());
    assert!(last_error().unwrap().contains("empty response"));

    assert_eq!(unsafe { tpm_context_close(&mut h.context) }, TpmError::Success);
}

#[test]
fn test_panicking_transport_is_contained() {
    fn driver_bug() -> TransportError {
        panic!("device driver bug")
    }
    let mut h = harness(Some(driver_bug));
    let mut response = TpmObject::empty();

    assert_eq!(submit(&h.context, &mut response), TpmError::OperationFailed);
    assert_eq!(response.kind, TPM_OBJECT_NONE);
    let text = last_error().unwrap();
    assert!(text.contains("tpm_context_message"));
    assert!(text.contains("device driver bug"));

    assert_eq!(unsafe { tpm_context_close(&mut h.context) }, TpmError::Success);
    assert_eq!(h.closes.get(), 1);
}

#[test]
fn test_desynced_session_is_not_reused() {
    let mut h = harness(Some(|| TransportError::ShortRead {
        expected: 6,
        actual: 0,
    }));
    let mut response = TpmObject::empty();

    assert_eq!(submit(&h.context, &mut response), TpmError::OperationFailed);
    assert_eq!(h.closes.get(), 1);

    assert_eq!(submit(&h.context, &mut response), TpmError::OperationFailed);
    assert_eq!(h.requests.get(), 1);
    assert!(last_error().unwrap().contains("closed"));

    assert_eq!(unsafe { tpm_context_close(&mut h.context) }, TpmError::Success);
    assert_eq!(h.closes.get(), 1);
}

#[test]
fn test_submit_rejects_mismatched_tags() {
    let mut message = TpmObject::message(vec![1, 2, 3]).unwrap();
    let mut response = TpmObject::empty();

    assert_eq!(submit(&message, &mut response), TpmError::InvalidObject);
    assert_eq!(submit(&TpmObject::empty(), &mut response), TpmError::InvalidObject);
    assert_eq!(response.kind, TPM_OBJECT_NONE);

    let mut unknown = TpmObject::empty();
    unknown.kind = 9;
    assert_eq!(submit(&unknown, &mut response), TpmError::InvalidObject);
    assert!(last_error().unwrap().starts_with("invalid object"));

    assert_eq!(unsafe { tpm_message_get_length(&message) }, 3);
    assert_eq!(unsafe { tpm_context_close(&mut message) }, TpmError::Success);
}

#[test]
fn test_submit_rejects_populated_response() {
    let mut h = harness(None);
    let mut response = TpmObject::message(vec![0xAA, 0xBB]).unwrap();
    let data = unsafe { tpm_message_get_data(&response) };

    assert_eq!(submit(&h.context, &mut response), TpmError::InvalidObject);
    assert_eq!(h.requests.get(), 0);
    assert_eq!(unsafe { tpm_message_get_data(&response) }, data);
    assert_eq!(unsafe { tpm_message_get_length(&response) }, 2);

    let mut other_context = harness(None);
    assert_eq!(
        submit(&h.context, &mut other_context.context),
        TpmError::InvalidObject
    );

    unsafe {
        assert_eq!(tpm_context_close(&mut response), TpmError::Success);
        assert_eq!(tpm_context_close(&mut h.context), TpmError::Success);
        assert_eq!(tpm_context_close(&mut other_context.context), TpmError::Success);
    }
}

#[test]
fn test_submit_pointer_checks() {
    let mut h = harness(None);
    let mut response = TpmObject::empty();

    let ret = unsafe { tpm_context_message(&h.context, std::ptr::null(), 12, &mut response) };
    assert_eq!(ret, TpmError::InvalidObject);

    let ret = unsafe {
        tpm_context_message(
            std::ptr::null(),
            COMMAND.as_ptr(),
            COMMAND.len() as u32,
            &mut response,
        )
    };
    assert_eq!(ret, TpmError::InvalidObject);

    let ret = unsafe {
        tpm_context_message(
            &h.context,
            COMMAND.as_ptr(),
            COMMAND.len() as u32,
            std::ptr::null_mut(),
        )
    };
    assert_eq!(ret, TpmError::InvalidObject);

    let context: *mut TpmObject = &mut h.context;
    let ret =
        unsafe { tpm_context_message(context, COMMAND.as_ptr(), COMMAND.len() as u32, context) };
    assert_eq!(ret, TpmError::InvalidObject);
    assert_eq!(h.requests.get(), 0);

    // An empty request is passed through; framing is the transport's concern
    let ret = unsafe { tpm_context_message(&h.context, std::ptr::null(), 0, &mut response) };
    assert_eq!(ret, TpmError::Success);
    assert_eq!(h.requests.get(), 1);

    unsafe {
        assert_eq!(tpm_context_close(&mut response), TpmError::Success);
        assert_eq!(tpm_context_close(&mut h.context), TpmError::Success);
    }
}

#[test]
fn test_read_rejects_non_messages() {
    let mut h = harness(None);
    let mut unknown = TpmObject::empty();
    unknown.kind = -5;

    unsafe {
        assert!(tpm_message_get_data(std::ptr::null()).is_null());
        assert!(tpm_message_get_data(&TpmObject::empty()).is_null());
        assert!(tpm_message_get_data(&h.context).is_null());
        assert!(tpm_message_get_data(&unknown).is_null());
        assert_eq!(tpm_message_get_length(&h.context), 0);
        assert_eq!(tpm_context_close(&mut h.context), TpmError::Success);
    }
}

#[test]
fn test_close_rejects_invalid_handles() {
    let mut unknown = TpmObject::empty();
    unknown.kind = 3;

    unsafe {
        assert_eq!(tpm_context_close(std::ptr::null_mut()), TpmError::InvalidObject);
        assert_eq!(tpm_context_close(&mut TpmObject::empty()), TpmError::InvalidObject);
        assert_eq!(tpm_context_close(&mut unknown), TpmError::InvalidObject);
    }
    assert_eq!(unknown.kind, 3);

    let mut pretagged = TpmObject {
        kind: TPM_OBJECT_CONTEXT,
        ..TpmObject::empty()
    };
    assert_eq!(unsafe { tpm_context_close(&mut pretagged) }, TpmError::InvalidObject);
}

#[test]
fn test_init_rejects_populated_handles() {
    let mut h = harness(None);
    let mut message = TpmObject::message(vec![1]).unwrap();

    unsafe {
        assert_eq!(tpm_context_init(std::ptr::null_mut()), TpmError::InvalidObject);
        assert_eq!(tpm_context_init(&mut h.context), TpmError::InvalidObject);
        assert_eq!(tpm_context_init(&mut message), TpmError::InvalidObject);
    }
    assert_eq!(message.kind(), Some(ObjectKind::Message));

    unsafe {
        assert_eq!(tpm_context_close(&mut message), TpmError::Success);
        assert_eq!(tpm_context_close(&mut h.context), TpmError::Success);
    }
    assert_eq!(h.closes.get(), 1);
}

#[cfg(unix)]
#[test]
fn test_init_reports_unavailable_channel() {
    let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    std::env::set_var(
        tpm_transport::DEVICE_ENV,
        "/nonexistent/tpm-ffi-test/tpmrm0",
    );
    let mut context = TpmObject::empty();
    let ret = unsafe { tpm_context_init(&mut context) };
    let text = last_error();
    std::env::remove_var(tpm_transport::DEVICE_ENV);

    assert_eq!(ret, TpmError::OperationFailed);
    assert_eq!(context.kind, TPM_OBJECT_NONE);
    assert!(text.unwrap().contains("/nonexistent/tpm-ffi-test/tpmrm0"));
}

#[test]
#[ignore = "requires a TPM resource manager"]
fn test_get_random_on_device() {
    let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut context = TpmObject::empty();
    let mut response = TpmObject::empty();
    unsafe {
        assert_eq!(tpm_context_init(&mut context), TpmError::Success);
        assert_eq!(submit(&context, &mut response), TpmError::Success);
        assert_eq!(tpm_message_get_length(&response), 20);
        assert_eq!(tpm_context_close(&mut response), TpmError::Success);
        assert_eq!(tpm_context_close(&mut context), TpmError::Success);
    }
}
