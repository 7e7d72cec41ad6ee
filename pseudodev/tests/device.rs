#[macro_use]
extern crate hamcrest;

use std::sync::Arc;

use hamcrest::prelude::*;
use pseudodev::{
    CancellationToken, CursorMode, Device, DeviceConfig, DeviceError, Handle, Whence, PSEUDO_INC,
};

async fn device_at(capacity: usize, position: i64) -> (Device, Handle, CancellationToken) {
    let device = Device::with_capacity(capacity).unwrap();
    let handle = device.open().await;
    let cancel = CancellationToken::new();
    device
        .seek(handle, position, Whence::Start, &cancel)
        .await
        .unwrap();
    (device, handle, cancel)
}

#[tokio::test]
async fn test_initial_pattern() {
    for capacity in [1, 4, 255, 256, 257, 1000] {
        let device = Device::with_capacity(capacity).unwrap();
        let contents = device.contents().await;
        assert_eq!(contents.len(), capacity);
        for (i, byte) in contents.iter().enumerate() {
            assert_eq!(usize::from(*byte), i % 256);
        }
    }
}

#[tokio::test]
async fn test_read_wraps_around() {
    let (device, handle, cancel) = device_at(4, 2).await;

    let mut out = vec![0u8; 6];
    let n = device.read(handle, 6, &mut out, &cancel).await.unwrap();

    assert_eq!(n, 6);
    assert_eq!(out, vec![2, 3, 0, 1, 2, 3]);
    // The last byte read was buffer[3]; wrap happens before the next byte
    assert_eq!(device.tell(handle).await, Ok(4));
}

#[tokio::test]
async fn test_read_more_than_capacity() {
    let (device, handle, cancel) = device_at(3, 0).await;

    let mut out = vec![0u8; 10];
    device.read(handle, 10, &mut out, &cancel).await.unwrap();

    assert_eq!(out, vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
    assert_eq!(device.tell(handle).await, Ok(1));
}

#[tokio::test]
async fn test_read_zero_bytes() {
    let (device, handle, cancel) = device_at(4, 1).await;

    let mut out: Vec<u8> = Vec::new();
    assert_eq!(device.read(handle, 0, &mut out, &cancel).await, Ok(0));
    assert_eq!(device.tell(handle).await, Ok(1));
}

#[tokio::test]
async fn test_read_after_write_to_end_wraps() {
    let (device, handle, cancel) = device_at(4, 2).await;
    assert_eq!(device.write(handle, 2, &b"xy"[..], &cancel).await, Ok(2));
    assert_eq!(device.tell(handle).await, Ok(4));

    let mut out = vec![0u8; 2];
    device.read(handle, 2, &mut out, &cancel).await.unwrap();
    assert_eq!(out, vec![0, 1]);
    assert_eq!(device.tell(handle).await, Ok(2));
}

#[tokio::test]
async fn test_read_fault_keeps_position() {
    let (device, handle, cancel) = device_at(4, 1).await;

    let mut out = vec![0u8; 2];
    let err = device.read(handle, 5, &mut out, &cancel).await.unwrap_err();

    assert!(matches!(err, DeviceError::Fault { .. }));
    assert_eq!(device.tell(handle).await, Ok(1));
    assert_eq!(device.contents().await, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_write_truncates_at_end() {
    let (device, handle, cancel) = device_at(4, 2).await;

    let data = b"ABCDE".to_vec();
    let n = device.write(handle, 5, &data, &cancel).await.unwrap();

    assert_eq!(n, 2);
    assert_eq!(device.contents().await, vec![0, 1, b'A', b'B']);
    assert_eq!(device.tell(handle).await, Ok(4));
}

#[tokio::test]
async fn test_write_at_end_writes_nothing() {
    let (device, handle, cancel) = device_at(4, 3).await;
    assert_eq!(device.write(handle, 1, &b"z"[..], &cancel).await, Ok(1));
    assert_eq!(device.tell(handle).await, Ok(4));

    let n = device.write(handle, 3, &b"abc"[..], &cancel).await.unwrap();

    assert_eq!(n, 0);
    assert_eq!(device.tell(handle).await, Ok(4));
    assert_eq!(device.contents().await, vec![0, 1, 2, b'z']);
}

#[tokio::test]
async fn test_write_fault_commits_nothing() {
    let (device, handle, cancel) = device_at(8, 1).await;

    // Caller claims 4 bytes but only provides 2
    let err = device
        .write(handle, 4, &b"ab"[..], &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, DeviceError::Fault { .. }));
    assert_eq!(device.tell(handle).await, Ok(1));
    assert_eq!(device.contents().await, (0..8).collect::<Vec<u8>>());
}

#[tokio::test]
async fn test_write_fault_only_counts_clamped_bytes() {
    // Only 2 bytes fit, and the caller provides exactly 2: no fault
    let (device, handle, cancel) = device_at(4, 2).await;
    assert_eq!(device.write(handle, 100, &b"ab"[..], &cancel).await, Ok(2));
}

#[tokio::test]
async fn test_seek_bounds() {
    let device = Device::with_capacity(4).unwrap();
    let handle = device.open().await;
    let cancel = CancellationToken::new();

    let err = device
        .seek(handle, 4, Whence::Start, &cancel)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        DeviceError::OutOfRange {
            candidate: 4,
            capacity: 4
        }
    );

    assert_eq!(device.seek(handle, 3, Whence::Start, &cancel).await, Ok(3));
    assert_eq!(device.seek(handle, -3, Whence::Current, &cancel).await, Ok(0));

    let err = device
        .seek(handle, -1, Whence::Current, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, DeviceError::OutOfRange { candidate: -1, .. }));
    assert_eq!(device.tell(handle).await, Ok(0));
}

#[tokio::test]
async fn test_seek_from_end_is_last_byte_relative() {
    let device = Device::with_capacity(10).unwrap();
    let handle = device.open().await;
    let cancel = CancellationToken::new();

    assert_eq!(device.seek(handle, 0, Whence::End, &cancel).await, Ok(9));
    assert_eq!(device.seek(handle, -9, Whence::End, &cancel).await, Ok(0));
    assert!(device.seek(handle, 1, Whence::End, &cancel).await.is_err());
    assert!(device.seek(handle, -10, Whence::End, &cancel).await.is_err());
    assert_eq!(device.tell(handle).await, Ok(0));
}

#[tokio::test]
async fn test_seek_rejects_position_write_can_reach() {
    let (device, handle, cancel) = device_at(4, 0).await;
    device.write(handle, 4, &b"full"[..], &cancel).await.unwrap();
    assert_eq!(device.tell(handle).await, Ok(4));

    assert!(device.seek(handle, 0, Whence::Current, &cancel).await.is_err());
    assert!(device.seek(handle, 4, Whence::Start, &cancel).await.is_err());
    assert_eq!(device.tell(handle).await, Ok(4));
}

#[tokio::test]
async fn test_seek_extreme_offsets() {
    let (device, handle, cancel) = device_at(4, 3).await;
    assert!(device
        .seek(handle, i64::MAX, Whence::Current, &cancel)
        .await
        .is_err());
    assert!(device
        .seek(handle, i64::MIN, Whence::End, &cancel)
        .await
        .is_err());
    assert_eq!(device.tell(handle).await, Ok(3));
}

#[tokio::test]
async fn test_increment_and_back() {
    let (device, handle, cancel) = device_at(300, 0).await;
    device
        .write(handle, 3, &[0xffu8, 0x00, 0x80][..], &cancel)
        .await
        .unwrap();
    let before = device.contents().await;

    device.increment(handle, 5, &cancel).await.unwrap();
    let bumped = device.contents().await;
    assert_eq!(bumped[0], 0x04);
    assert_eq!(bumped[1], 0x05);
    assert_eq!(bumped[2], 0x85);
    assert_eq!(bumped[299], 0x30);

    device.increment(handle, -5, &cancel).await.unwrap();
    assert_eq!(device.contents().await, before);
    assert_eq!(device.tell(handle).await, Ok(3));
}

#[tokio::test]
async fn test_ioctl_unsupported_code() {
    let (device, handle, cancel) = device_at(4, 2).await;

    let err = device
        .ioctl(handle, 0x5401, &[1u8][..], &cancel)
        .await
        .unwrap_err();

    assert_eq!(err, DeviceError::Unsupported(0x5401));
    assert_eq!(device.contents().await, vec![0, 1, 2, 3]);
    assert_eq!(device.tell(handle).await, Ok(2));
}

#[tokio::test]
async fn test_ioctl_missing_argument_faults() {
    let (device, handle, cancel) = device_at(4, 0).await;

    let err = device
        .ioctl(handle, PSEUDO_INC, &[0u8; 0][..], &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, DeviceError::Fault { .. }));
    assert_eq!(device.contents().await, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_ioctl_raw_increment() {
    let (device, handle, cancel) = device_at(4, 0).await;
    let delta: i8 = -1;

    device
        .ioctl(handle, PSEUDO_INC, &delta.to_ne_bytes()[..], &cancel)
        .await
        .unwrap();

    assert_eq!(device.contents().await, vec![0xff, 0, 1, 2]);
}

#[tokio::test]
async fn test_shared_cursor_between_handles() {
    let device = Device::with_capacity(8).unwrap();
    let cancel = CancellationToken::new();
    let a = device.open().await;
    let b = device.open().await;

    device.seek(a, 5, Whence::Start, &cancel).await.unwrap();
    assert_eq!(device.tell(b).await, Ok(5));

    let mut out = vec![0u8; 1];
    device.read(b, 1, &mut out, &cancel).await.unwrap();
    assert_eq!(out, vec![5]);
    assert_eq!(device.tell(a).await, Ok(6));
}

#[tokio::test]
async fn test_per_handle_cursors() {
    let config = DeviceConfig::new(8).with_cursor_mode(CursorMode::PerHandle);
    let device = Device::new(&config).unwrap();
    assert_eq!(device.cursor_mode(), CursorMode::PerHandle);
    let cancel = CancellationToken::new();
    let a = device.open().await;
    let b = device.open().await;

    device.seek(a, 5, Whence::Start, &cancel).await.unwrap();
    assert_eq!(device.tell(a).await, Ok(5));
    assert_eq!(device.tell(b).await, Ok(0));

    let mut out = vec![0u8; 2];
    device.read(b, 2, &mut out, &cancel).await.unwrap();
    assert_eq!(out, vec![0, 1]);
    assert_eq!(device.tell(a).await, Ok(5));

    // Reopening starts from scratch
    device.close(a).await;
    let c = device.open().await;
    assert_eq!(device.tell(c).await, Ok(0));
}

#[tokio::test]
async fn test_closed_handle_is_rejected() {
    let device = Device::with_capacity(4).unwrap();
    let cancel = CancellationToken::new();
    let handle = device.open().await;
    device.close(handle).await;

    let mut out = vec![0u8; 1];
    assert_eq!(
        device.read(handle, 1, &mut out, &cancel).await,
        Err(DeviceError::BadHandle(handle))
    );
    assert_eq!(
        device.write(handle, 1, &b"x"[..], &cancel).await,
        Err(DeviceError::BadHandle(handle))
    );
    assert_eq!(device.tell(handle).await, Err(DeviceError::BadHandle(handle)));

    // Closing twice still succeeds
    device.close(handle).await;
}

#[tokio::test]
async fn test_buffer_persists_across_opens() {
    let device = Device::with_capacity(4).unwrap();
    let cancel = CancellationToken::new();

    let first = device.open().await;
    device.write(first, 2, &b"hi"[..], &cancel).await.unwrap();
    device.close(first).await;

    let second = device.open().await;
    assert_ne!(second, first);
    let contents = device.contents().await;
    assert_that!(contents, equal_to(vec![b'h', b'i', 2, 3]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_read_never_observes_partial_increment() {
    const CAPACITY: usize = 64 * 1024;

    let device = Arc::new(Device::with_capacity(CAPACITY).unwrap());
    // Make every byte equal so a torn read would show two different values
    {
        let handle = device.open().await;
        let cancel = CancellationToken::new();
        device
            .write(handle, CAPACITY, &vec![7u8; CAPACITY], &cancel)
            .await
            .unwrap();
        device.close(handle).await;
    }

    let incrementer = {
        let device = Arc::clone(&device);
        tokio::spawn(async move {
            let handle = device.open().await;
            let cancel = CancellationToken::new();
            for _ in 0..50 {
                device.increment(handle, 3, &cancel).await.unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let mut readers = Vec::new();
    for _ in 0..3 {
        let device = Arc::clone(&device);
        readers.push(tokio::spawn(async move {
            let handle = device.open().await;
            let cancel = CancellationToken::new();
            let mut out = vec![0u8; CAPACITY];
            for _ in 0..50 {
                device.read(handle, CAPACITY, &mut out, &cancel).await.unwrap();
                let first = out[0];
                assert!(out.iter().all(|b| *b == first), "torn read");
                tokio::task::yield_now().await;
            }
        }));
    }

    incrementer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }

    let expected = 7u8.wrapping_add(150u8);
    assert!(device.contents().await.iter().all(|b| *b == expected));
}
