mod fault_detection;
mod trigger_loop;
