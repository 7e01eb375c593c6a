//! Marshals asynchronous storage completions back onto the single
//! cooperative execution context that owns sessions and views. Worker-side
//! code never touches that state directly: it posts a continuation, and the
//! main loop runs it.

use std::future::Future;
use tokio::sync::mpsc;
use tracing::debug;

pub type MainTask<C> = Box<dyn FnOnce(&mut C) + Send>;

pub struct MainHandle<C> {
    tx: mpsc::UnboundedSender<MainTask<C>>,
}

impl<C> Clone for MainHandle<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

pub struct MainQueue<C> {
    rx: mpsc::UnboundedReceiver<MainTask<C>>,
}

pub fn main_channel<C>() -> (MainHandle<C>, MainQueue<C>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MainHandle { tx }, MainQueue { rx })
}

impl<C: 'static> MainHandle<C> {
    /// Queues a task for the main context. A closed queue means shutdown is
    /// under way; the task is dropped and the race is logged, not fatal.
    pub fn post(&self, task: impl FnOnce(&mut C) + Send + 'static) {
        if self.tx.send(Box::new(task)).is_err() {
            debug!("main queue closed, task dropped");
        }
    }

    /// Runs `operation` on the worker runtime and delivers its output to
    /// `continuation` on the main context. This is the only sanctioned path
    /// from a storage completion to session or view state.
    pub fn dispatch<F, T>(
        &self,
        operation: F,
        continuation: impl FnOnce(T, &mut C) + Send + 'static,
    ) where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.clone();
        tokio::spawn(async move {
            let output = operation.await;
            handle.post(move |context| continuation(output, context));
        });
    }
}

impl<C> MainQueue<C> {
    /// Waits for the next task. `None` once every handle is gone.
    pub async fn next(&mut self) -> Option<MainTask<C>> {
        self.rx.recv().await
    }

    /// Runs everything currently queued without waiting. Returns the number
    /// of tasks executed.
    pub fn drain(&mut self, context: &mut C) -> usize {
        let mut executed = 0;
        while let Ok(task) = self.rx.try_recv() {
            task(context);
            executed += 1;
        }
        executed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Panel {
        lines: Vec<String>,
    }

    #[tokio::test]
    async fn dispatch_delivers_output_to_the_main_context() {
        let (handle, mut queue) = main_channel::<Panel>();
        handle.dispatch(async { 41 + 1 }, |value, panel: &mut Panel| {
            panel.lines.push(format!("result {}", value));
        });
        let mut panel = Panel { lines: Vec::new() };
        let task = queue.next().await.expect("task queued");
        task(&mut panel);
        assert_eq!(panel.lines, vec!["result 42".to_string()]);
    }

    #[tokio::test]
    async fn post_crosses_threads() {
        let (handle, mut queue) = main_channel::<Panel>();
        let worker = std::thread::spawn(move || {
            handle.post(|panel: &mut Panel| panel.lines.push("from worker".to_string()));
        });
        worker.join().expect("worker finished");
        let mut panel = Panel { lines: Vec::new() };
        assert_eq!(queue.drain(&mut panel), 1);
        assert_eq!(panel.lines, vec!["from worker".to_string()]);
    }

    #[tokio::test]
    async fn closed_queue_drops_tasks_silently() {
        let (handle, queue) = main_channel::<Panel>();
        drop(queue);
        handle.post(|_panel: &mut Panel| panic!("must not run"));
    }
}
