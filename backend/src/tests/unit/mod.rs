mod reaper;
