#[cfg(test)]
pub mod test {
    use std::sync::Arc;

    use crate::{
        devices::{Admission, IoType},
        kernel::OpenFileTable,
        tests::{manual_machine, request, DISK},
    };

    #[tokio::main]
    #[test]
    async fn two_threads_share_one_disk() {
        let machine = manual_machine();
        let task = machine.tasks.create_task();
        let thread_a = machine.threads.create_thread(task);
        let thread_b = machine.threads.create_thread(task);
        let file_a = machine.files.open();
        let file_b = machine.files.open();
        let device = machine.devices.get(DISK).unwrap();

        assert_eq!(device.geometry().blocks_per_track(), 10);
        assert_eq!(device.geometry().platters(), 4);

        let a = request(&machine, thread_a, 1, 25, DISK, IoType::FileRead, file_a);
        assert_eq!(machine.issue(Arc::clone(&a)).await, Ok(Admission::Started));
        assert_eq!(a.cylinder(), Some(0));
        assert!(device.is_busy());
        assert_eq!(device.queue_len(), 0);

        let b = request(&machine, thread_b, 2, 41, DISK, IoType::FileWrite, file_b);
        assert_eq!(machine.issue(Arc::clone(&b)).await, Ok(Admission::Queued));
        assert_eq!(b.cylinder(), Some(1));
        assert_eq!(device.snapshot().queued, vec![b.id()]);

        // A completes, B takes over
        assert!(machine.complete(DISK));
        assert!(a.is_done());
        assert_eq!(machine.files.iorb_count(file_a), 0);
        assert!(!machine.pages.is_locked(1));
        assert!(machine.frames.is_dirty(1));

        let snapshot = device.snapshot();
        assert!(snapshot.busy);
        assert_eq!(snapshot.in_service, Some(b.id()));
        assert!(snapshot.queued.is_empty());
        assert_eq!(machine.scheduler.dispatch_count(), 1);

        // B completes, the disk goes idle
        assert!(machine.complete(DISK));
        assert!(b.is_done());
        assert_eq!(machine.files.iorb_count(file_b), 0);
        assert!(!machine.pages.is_locked(2));

        let snapshot = device.snapshot();
        assert!(!snapshot.busy);
        assert_eq!(snapshot.in_service, None);
        assert!(snapshot.queued.is_empty());
        assert_eq!(machine.scheduler.dispatch_count(), 2);
    }

    #[tokio::main]
    #[test]
    async fn killed_thread_loses_its_queued_request() {
        let machine = manual_machine();
        let task = machine.tasks.create_task();
        let thread_a = machine.threads.create_thread(task);
        let other = machine.threads.create_thread(task);
        let file_a = machine.files.open();
        let other_file = machine.files.open();
        let device = machine.devices.get(DISK).unwrap();

        let busy = request(&machine, other, 1, 0, DISK, IoType::FileRead, other_file);
        machine.issue(busy).await.unwrap();

        let queued = request(&machine, thread_a, 2, 60, DISK, IoType::FileRead, file_a);
        assert_eq!(machine.issue(Arc::clone(&queued)).await, Ok(Admission::Queued));
        machine.files.close(file_a);

        assert_eq!(machine.kill_thread(thread_a), 1);

        assert_eq!(device.queue_len(), 0);
        assert!(!machine.pages.is_locked(2));
        assert_eq!(machine.files.iorb_count(file_a), 0);
        assert!(machine.files.get(file_a).unwrap().closed);
        assert!(!queued.is_done());

        // The disk carries on with the other thread's request only
        assert!(machine.complete(DISK));
        assert!(!device.is_busy());
        assert_eq!(machine.disk(DISK).unwrap().started().len(), 1);
    }
}
