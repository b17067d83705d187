#[cfg(test)]
pub mod test {
    use std::sync::Arc;

    use crate::{
        devices::{Admission, IoType, Iorb},
        error::IoError,
        kernel::OpenFileTable,
        tests::{manual_machine, request, DISK, SWAP},
    };

    #[tokio::test]
    async fn idle_device_starts_request_immediately() {
        let machine = manual_machine();
        let task = machine.tasks.create_task();
        let thread = machine.threads.create_thread(task);
        let file = machine.files.open();

        let iorb = request(&machine, thread, 3, 25, DISK, IoType::FileRead, file);
        assert_eq!(iorb.cylinder(), None);

        let admission = machine.issue(Arc::clone(&iorb)).await;
        assert_eq!(admission, Ok(Admission::Started));

        // 10 blocks per track on 4 platters
        assert_eq!(iorb.cylinder(), Some(0));

        let device = machine.devices.get(DISK).unwrap();
        assert!(device.is_busy());
        assert_eq!(device.queue_len(), 0);
        assert_eq!(device.snapshot().in_service, Some(iorb.id()));

        assert_eq!(machine.pages.holder(3), Some(thread));
        assert_eq!(machine.files.iorb_count(file), 1);
        assert_eq!(machine.disk(DISK).unwrap().in_flight().map(|i| i.id()), Some(iorb.id()));

        // The other device is untouched
        assert!(!machine.devices.get(SWAP).unwrap().is_busy());
    }

    #[tokio::test]
    async fn busy_device_serves_in_arrival_order() {
        let machine = manual_machine();
        let task = machine.tasks.create_task();
        let thread = machine.threads.create_thread(task);
        let file = machine.files.open();

        let blocks = [400, 3, 41, 120, 0];
        let mut iorbs = Vec::new();
        for (page, block) in blocks.iter().enumerate() {
            let iorb = request(&machine, thread, page as u32, *block, DISK, IoType::FileWrite, file);
            iorbs.push(iorb);
        }

        assert_eq!(machine.issue(Arc::clone(&iorbs[0])).await, Ok(Admission::Started));
        for iorb in &iorbs[1..] {
            assert_eq!(machine.issue(Arc::clone(iorb)).await, Ok(Admission::Queued));
        }

        let cylinders: Vec<Option<u32>> = iorbs.iter().map(|iorb| iorb.cylinder()).collect();
        assert_eq!(cylinders, vec![Some(10), Some(0), Some(1), Some(3), Some(0)]);

        let device = machine.devices.get(DISK).unwrap();
        let expected_queue: Vec<u64> = iorbs[1..].iter().map(|iorb| iorb.id()).collect();
        assert_eq!(device.snapshot().queued, expected_queue);

        while machine.complete(DISK) {
            let snapshot = device.snapshot();
            // At most one in service and never also queued
            if let Some(current) = snapshot.in_service {
                assert!(snapshot.busy);
                assert!(!snapshot.queued.contains(&current));
            }
        }

        let started = machine.disk(DISK).unwrap().started();
        let admitted: Vec<u64> = iorbs.iter().map(|iorb| iorb.id()).collect();
        assert_eq!(started, admitted);

        assert!(!device.is_busy());
        assert_eq!(machine.files.iorb_count(file), 0);
        assert!(iorbs.iter().all(|iorb| iorb.is_done()));
    }

    #[tokio::test]
    async fn dequeue_takes_the_head() {
        let machine = manual_machine();
        let task = machine.tasks.create_task();
        let thread = machine.threads.create_thread(task);
        let file = machine.files.open();
        let device = machine.devices.get(DISK).unwrap();

        assert!(device.dequeue_iorb().is_none());

        let first = request(&machine, thread, 1, 1, DISK, IoType::FileRead, file);
        let second = request(&machine, thread, 2, 2, DISK, IoType::FileRead, file);
        let third = request(&machine, thread, 3, 3, DISK, IoType::FileRead, file);

        machine.issue(Arc::clone(&first)).await.unwrap();
        machine.issue(Arc::clone(&second)).await.unwrap();
        machine.issue(Arc::clone(&third)).await.unwrap();

        assert_eq!(device.dequeue_iorb().map(|iorb| iorb.id()), Some(second.id()));
        assert_eq!(device.dequeue_iorb().map(|iorb| iorb.id()), Some(third.id()));
        assert!(device.dequeue_iorb().is_none());

        // Dequeuing alone starts nothing
        assert_eq!(machine.disk(DISK).unwrap().started(), vec![first.id()]);
    }

    #[tokio::test]
    async fn killed_thread_is_refused_at_admission() {
        let machine = manual_machine();
        let task = machine.tasks.create_task();
        let thread = machine.threads.create_thread(task);
        let file = machine.files.open();

        machine.threads.kill(thread);

        let iorb = request(&machine, thread, 9, 85, DISK, IoType::FileRead, file);
        let admission = machine.issue(Arc::clone(&iorb)).await;
        assert_eq!(admission, Err(IoError::ThreadKilled { thread }));

        let device = machine.devices.get(DISK).unwrap();
        assert!(!device.is_busy());
        assert_eq!(device.queue_len(), 0);
        assert!(machine.disk(DISK).unwrap().started().is_empty());

        // Admission got as far as the lock, the counter and the cylinder
        assert_eq!(iorb.cylinder(), Some(2));
        assert!(machine.pages.is_locked(9));
        assert_eq!(machine.files.iorb_count(file), 1);

        device.release_abandoned(&iorb);
        assert!(!machine.pages.is_locked(9));
        assert_eq!(machine.files.iorb_count(file), 0);
    }

    #[tokio::test]
    async fn killed_thread_is_not_queued_behind_busy_device() {
        let machine = manual_machine();
        let task = machine.tasks.create_task();
        let live = machine.threads.create_thread(task);
        let doomed = machine.threads.create_thread(task);
        let file = machine.files.open();

        let first = request(&machine, live, 1, 0, DISK, IoType::FileWrite, file);
        machine.issue(first).await.unwrap();

        machine.threads.kill(doomed);
        let refused = request(&machine, doomed, 2, 0, DISK, IoType::FileWrite, file);
        assert_eq!(
            machine.issue(Arc::clone(&refused)).await,
            Err(IoError::ThreadKilled { thread: doomed })
        );

        let snapshot = machine.devices.get(DISK).unwrap().snapshot();
        assert!(snapshot.queued.is_empty());
        assert_ne!(snapshot.in_service, Some(refused.id()));
    }

    #[tokio::test]
    async fn admission_waits_for_a_locked_page() {
        let machine = Arc::new(manual_machine());
        let task = machine.tasks.create_task();
        let owner = machine.threads.create_thread(task);
        let waiter = machine.threads.create_thread(task);
        let file = machine.files.open();

        let first = request(&machine, owner, 7, 3, DISK, IoType::FileRead, file);
        assert_eq!(machine.issue(first).await, Ok(Admission::Started));

        let second = Iorb::new(waiter, 7, 50, DISK, IoType::FileWrite, file);
        let pending = {
            let machine = Arc::clone(&machine);
            let second = Arc::clone(&second);
            tokio::spawn(async move { machine.issue(second).await })
        };

        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(!pending.is_finished());
        assert_eq!(machine.files.iorb_count(file), 1);
        assert_eq!(second.cylinder(), None);

        // Completion unlocks the page and lets the second request in
        assert!(machine.complete(DISK));
        assert_eq!(pending.await.unwrap(), Ok(Admission::Started));

        assert_eq!(machine.pages.holder(7), Some(waiter));
        assert_eq!(machine.pages.grants(7), 2);
        assert_eq!(second.cylinder(), Some(1));
    }

    #[tokio::test]
    async fn thread_killed_while_waiting_for_page_fails() {
        let machine = Arc::new(manual_machine());
        let task = machine.tasks.create_task();
        let owner = machine.threads.create_thread(task);
        let waiter = machine.threads.create_thread(task);
        let owner_file = machine.files.open();
        let waiter_file = machine.files.open();

        let first = request(&machine, owner, 7, 3, DISK, IoType::FileRead, owner_file);
        machine.issue(first).await.unwrap();

        let second = Iorb::new(waiter, 7, 50, DISK, IoType::FileWrite, waiter_file);
        let pending = {
            let machine = Arc::clone(&machine);
            tokio::spawn(async move { machine.issue(second).await })
        };

        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(!pending.is_finished());

        machine.threads.kill(waiter);
        assert_eq!(pending.await.unwrap(), Err(IoError::ThreadKilled { thread: waiter }));

        // Nothing was acquired on the waiter's behalf
        assert_eq!(machine.pages.holder(7), Some(owner));
        assert_eq!(machine.files.iorb_count(waiter_file), 0);
        assert_eq!(machine.devices.get(DISK).unwrap().queue_len(), 0);
    }

    #[tokio::test]
    async fn unknown_device_is_reported() {
        let machine = manual_machine();
        let task = machine.tasks.create_task();
        let thread = machine.threads.create_thread(task);
        let file = machine.files.open();

        let iorb = request(&machine, thread, 1, 1, 42, IoType::FileRead, file);
        assert_eq!(machine.issue(iorb).await, Err(IoError::UnknownDevice { device: 42 }));
        assert!(machine.devices.get(42).is_none());
        assert!(!machine.pages.is_locked(1));
    }
}
